//! Integrity Validator
//!
//! Plausibility filter applied to every record read back from storage:
//! structure, field types and a timestamp horizon. It guards against clock
//! skew and gross corruption, not against a deliberate forger.

use serde_json::Value;

use super::clock::Timestamp;
use super::config::QuotaConfig;
use super::error::ValidationError;
use super::record::UsageRecord;

/// Checks candidate records before they are trusted
#[derive(Debug, Clone, Copy)]
pub struct IntegrityValidator {
    lookback_ms: i64,
}

impl IntegrityValidator {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            lookback_ms: config.lookback_ms(),
        }
    }

    /// Whether `candidate` is a plausible record at time `now`
    pub fn validate(&self, candidate: &Value, now: Timestamp) -> bool {
        self.check(candidate, now).is_ok()
    }

    /// Like [`validate`](Self::validate) but reports the first problem found
    pub fn check(&self, candidate: &Value, now: Timestamp) -> Result<(), ValidationError> {
        let obj = candidate.as_object().ok_or(ValidationError::NotAnObject)?;

        match obj.get("signature") {
            None => return Err(ValidationError::MissingField("signature")),
            Some(Value::String(s)) if !s.is_empty() => {}
            Some(_) => return Err(ValidationError::MistypedField("signature")),
        }

        let uses = match obj.get("uses") {
            None => return Err(ValidationError::MissingField("uses")),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(ValidationError::MistypedField("uses")),
        };

        match obj.get("totalUses") {
            None => return Err(ValidationError::MissingField("totalUses")),
            Some(v) if v.as_u64().is_some() => {}
            Some(_) => return Err(ValidationError::MistypedField("totalUses")),
        }

        let first_use = timestamp_field(obj, "firstUse")?;
        let last_reset = timestamp_field(obj, "lastReset")?;

        self.check_horizon("firstUse", first_use, now)?;
        self.check_horizon("lastReset", last_reset, now)?;

        for item in uses {
            let ts = item.as_i64().ok_or(ValidationError::MistypedField("uses"))?;
            self.check_horizon("uses", ts, now)?;
        }

        Ok(())
    }

    /// Check `candidate` and decode it into a record
    pub fn parse(&self, candidate: Value, now: Timestamp) -> Result<UsageRecord, ValidationError> {
        self.check(&candidate, now)?;
        serde_json::from_value(candidate).map_err(|e| ValidationError::Decode(e.to_string()))
    }

    fn check_horizon(
        &self,
        field: &'static str,
        ts: Timestamp,
        now: Timestamp,
    ) -> Result<(), ValidationError> {
        if ts > now {
            return Err(ValidationError::FutureTimestamp(field));
        }
        if ts < now.saturating_sub(self.lookback_ms) {
            return Err(ValidationError::StaleTimestamp(field));
        }
        Ok(())
    }
}

fn timestamp_field(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Timestamp, ValidationError> {
    match obj.get(field) {
        None => Err(ValidationError::MissingField(field)),
        Some(v) => v.as_i64().ok_or(ValidationError::MistypedField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;
    const NOW: i64 = 1_700_000_000_000;

    fn validator() -> IntegrityValidator {
        IntegrityValidator::new(&QuotaConfig::default())
    }

    fn valid() -> Value {
        json!({
            "signature": "k3j2h1",
            "uses": [NOW - 2 * HOUR, NOW - HOUR],
            "totalUses": 2,
            "firstUse": NOW - 3 * HOUR,
            "lastReset": NOW - 3 * HOUR,
            "warningShown": false,
            "version": "1.0",
            "checksum": "abc"
        })
    }

    #[test]
    fn test_valid_record_accepted() {
        assert!(validator().validate(&valid(), NOW));
        let record = validator().parse(valid(), NOW).unwrap();
        assert_eq!(record.uses.len(), 2);
    }

    #[test]
    fn test_non_object_rejected() {
        for candidate in [json!(null), json!([1, 2]), json!("record"), json!(5)] {
            assert_eq!(
                validator().check(&candidate, NOW),
                Err(ValidationError::NotAnObject)
            );
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        for field in ["signature", "uses", "totalUses", "firstUse", "lastReset"] {
            let mut candidate = valid();
            candidate.as_object_mut().unwrap().remove(field);
            assert_eq!(
                validator().check(&candidate, NOW),
                Err(ValidationError::MissingField(field))
            );
        }
    }

    #[test]
    fn test_mistyped_fields_rejected() {
        let mut candidate = valid();
        candidate["uses"] = json!("not-a-list");
        assert_eq!(
            validator().check(&candidate, NOW),
            Err(ValidationError::MistypedField("uses"))
        );

        let mut candidate = valid();
        candidate["totalUses"] = json!("2");
        assert!(!validator().validate(&candidate, NOW));

        let mut candidate = valid();
        candidate["signature"] = json!("");
        assert!(!validator().validate(&candidate, NOW));

        let mut candidate = valid();
        candidate["uses"] = json!([NOW - HOUR, "later"]);
        assert!(!validator().validate(&candidate, NOW));
    }

    #[test]
    fn test_first_use_eight_days_old_rejected() {
        let mut candidate = valid();
        candidate["firstUse"] = json!(NOW - 8 * DAY);
        assert_eq!(
            validator().check(&candidate, NOW),
            Err(ValidationError::StaleTimestamp("firstUse"))
        );
    }

    #[test]
    fn test_future_timestamps_rejected() {
        let mut candidate = valid();
        candidate["lastReset"] = json!(NOW + 1);
        assert_eq!(
            validator().check(&candidate, NOW),
            Err(ValidationError::FutureTimestamp("lastReset"))
        );

        let mut candidate = valid();
        candidate["uses"] = json!([NOW + HOUR]);
        assert_eq!(
            validator().check(&candidate, NOW),
            Err(ValidationError::FutureTimestamp("uses"))
        );
    }

    #[test]
    fn test_stale_use_entry_rejected() {
        let mut candidate = valid();
        candidate["uses"] = json!([NOW - 8 * DAY, NOW - HOUR]);
        assert_eq!(
            validator().check(&candidate, NOW),
            Err(ValidationError::StaleTimestamp("uses"))
        );
        assert!(!validator().validate(&candidate, NOW));

        let mut candidate = valid();
        candidate["uses"] = json!([NOW - 7 * DAY - 1]);
        assert_eq!(
            validator().check(&candidate, NOW),
            Err(ValidationError::StaleTimestamp("uses"))
        );
    }

    #[test]
    fn test_horizon_boundary_inclusive() {
        let mut candidate = valid();
        candidate["firstUse"] = json!(NOW - 7 * DAY);
        candidate["uses"] = json!([NOW]);
        assert!(validator().validate(&candidate, NOW));
    }
}
