//! Usage Record
//!
//! The persisted per-client quota state. Serialised as a camelCase JSON
//! object and replicated verbatim to every storage location.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use super::clock::Timestamp;
use super::config::RECORD_VERSION;
use super::signature::ClientSignature;

/// Quota state for one client signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Client the record belongs to
    pub signature: ClientSignature,

    /// Use timestamps in the current window, insertion ordered
    pub uses: Vec<Timestamp>,

    /// Uses counted since the last window reset
    pub total_uses: u64,

    /// Creation time, never changed afterwards
    pub first_use: Timestamp,

    /// Start of the current window
    pub last_reset: Timestamp,

    /// Whether the limit notice fired in this window
    #[serde(default)]
    pub warning_shown: bool,

    /// Schema tag
    #[serde(default = "default_version")]
    pub version: String,

    /// Advisory tamper indicator, not verified
    #[serde(default)]
    pub checksum: String,
}

fn default_version() -> String {
    RECORD_VERSION.to_string()
}

impl UsageRecord {
    /// Fresh record with an empty window starting at `now`
    pub fn new(signature: ClientSignature, now: Timestamp) -> Self {
        let checksum = checksum(&signature, now);
        Self {
            signature,
            uses: Vec::new(),
            total_uses: 0,
            first_use: now,
            last_reset: now,
            warning_shown: false,
            version: default_version(),
            checksum,
        }
    }

    /// Whether the window started at `last_reset` has elapsed
    pub fn window_expired(&self, now: Timestamp, window_ms: i64) -> bool {
        now.saturating_sub(self.last_reset) > window_ms
    }

    /// Start a new window at `now`
    pub fn roll_window(&mut self, now: Timestamp) {
        self.uses.clear();
        self.total_uses = 0;
        self.warning_shown = false;
        self.last_reset = now;
        self.checksum = checksum(&self.signature, now);
    }

    /// Drop uses at or before `now - window_ms`
    pub fn prune(&mut self, now: Timestamp, window_ms: i64) {
        let cutoff = now.saturating_sub(window_ms);
        self.uses.retain(|&ts| ts > cutoff);
    }

    /// Most recent use, if any
    pub fn latest_use(&self) -> Option<Timestamp> {
        self.uses.iter().copied().max()
    }

    /// Append a use at `now`
    pub fn push_use(&mut self, now: Timestamp) {
        self.uses.push(now);
        self.total_uses += 1;
        self.checksum = checksum(&self.signature, now);
    }

    /// Serialise for storage
    pub fn to_json(&self) -> String {
        // Plain struct of strings, integers and bools; serialisation cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `base64(signature ++ timestamp)`
pub fn checksum(signature: &ClientSignature, at: Timestamp) -> String {
    BASE64.encode(format!("{}{}", signature, at))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;

    #[test]
    fn test_new_record() {
        let record = UsageRecord::new(ClientSignature::new("abc"), 1_000);
        assert!(record.uses.is_empty());
        assert_eq!(record.total_uses, 0);
        assert_eq!(record.first_use, 1_000);
        assert_eq!(record.last_reset, 1_000);
        assert_eq!(record.version, "1.0");
        assert_eq!(record.checksum, BASE64.encode("abc1000"));
    }

    #[test]
    fn test_json_field_names() {
        let record = UsageRecord::new(ClientSignature::new("abc"), 1_000);
        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        for field in [
            "signature",
            "uses",
            "totalUses",
            "firstUse",
            "lastReset",
            "warningShown",
            "version",
            "checksum",
        ] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{"signature":"abc","uses":[],"totalUses":0,"firstUse":1,"lastReset":1}"#;
        let record: UsageRecord = serde_json::from_str(json).unwrap();
        assert!(!record.warning_shown);
        assert_eq!(record.version, RECORD_VERSION);
        assert!(record.checksum.is_empty());
    }

    #[test]
    fn test_prune_keeps_only_window() {
        let now = 100 * HOUR;
        let mut record = UsageRecord::new(ClientSignature::new("abc"), now - 30 * HOUR);
        record.uses = vec![now - 25 * HOUR, now - 24 * HOUR, now - 23 * HOUR, now - 1];

        record.prune(now, 24 * HOUR);
        assert_eq!(record.uses, vec![now - 23 * HOUR, now - 1]);
    }

    #[test]
    fn test_roll_window_resets_counters_but_not_first_use() {
        let mut record = UsageRecord::new(ClientSignature::new("abc"), 0);
        record.push_use(10);
        record.push_use(2_000);
        record.warning_shown = true;

        record.roll_window(25 * HOUR);
        assert!(record.uses.is_empty());
        assert_eq!(record.total_uses, 0);
        assert!(!record.warning_shown);
        assert_eq!(record.last_reset, 25 * HOUR);
        assert_eq!(record.first_use, 0);
    }

    #[test]
    fn test_window_expired_is_strict() {
        let record = UsageRecord::new(ClientSignature::new("abc"), 0);
        assert!(!record.window_expired(24 * HOUR, 24 * HOUR));
        assert!(record.window_expired(24 * HOUR + 1, 24 * HOUR));
    }

    #[test]
    fn test_push_use_updates_checksum() {
        let mut record = UsageRecord::new(ClientSignature::new("abc"), 0);
        record.push_use(5_000);
        assert_eq!(record.total_uses, 1);
        assert_eq!(record.latest_use(), Some(5_000));
        assert_eq!(record.checksum, checksum(&ClientSignature::new("abc"), 5_000));
    }
}
