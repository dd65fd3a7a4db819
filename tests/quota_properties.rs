use proptest::prelude::*;
use quotaguard::quota::{
    credential_digest, ClientSignature, Clock, EnvironmentAttributes, IntegrityValidator,
    ManualClock, MemoryBackend, MemoryCookieJar, NoopNotifier, QuotaConfig, QuotaManager,
    SignatureGenerator, StorageBackend, StorageReplicator, StorageSet, UsageRecord,
};
use std::sync::Arc;

const NOW: i64 = 1_700_000_000_000;
const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;
const SECRET: &str = "open sesame";

struct Harness {
    clock: ManualClock,
    persistent: MemoryBackend,
    session: MemoryBackend,
    cookies: MemoryCookieJar,
    config: Arc<QuotaConfig>,
    manager: QuotaManager,
}

fn attributes(agent: &str) -> EnvironmentAttributes {
    EnvironmentAttributes {
        user_agent: Some(agent.to_string()),
        language: Some("en-US".to_string()),
        screen: Some((1920, 1080)),
        color_depth: Some(24),
        ..EnvironmentAttributes::default()
    }
}

fn harness_for(agent: &str, clock: ManualClock, persistent: MemoryBackend) -> Harness {
    let config = QuotaConfig {
        override_credential_sha256: Some(credential_digest(SECRET)),
        ..QuotaConfig::default()
    };
    let session = MemoryBackend::new();
    let cookies = MemoryCookieJar::new();
    let storage = StorageSet {
        persistent: Arc::new(persistent.clone()),
        session: Arc::new(session.clone()),
        cookies: Arc::new(cookies.clone()),
    };
    let manager = QuotaManager::new(
        config.clone(),
        SignatureGenerator::with_attributes(attributes(agent)),
        Arc::new(clock.clone()),
        storage,
        Arc::new(NoopNotifier),
    )
    .unwrap();

    Harness {
        clock,
        persistent,
        session,
        cookies,
        config: Arc::new(config),
        manager,
    }
}

fn harness() -> Harness {
    harness_for("property-client", ManualClock::new(NOW), MemoryBackend::new())
}

impl Harness {
    fn replicator(&self) -> StorageReplicator {
        StorageReplicator::new(
            Arc::clone(&self.config),
            Arc::new(self.clock.clone()),
            Arc::new(self.persistent.clone()),
            Arc::new(self.session.clone()),
            Arc::new(self.cookies.clone()),
        )
    }

    fn use_n(&self, n: usize) {
        for _ in 0..n {
            assert!(self.manager.record_use());
            self.clock.advance_ms(1_500);
        }
    }
}

proptest! {
    #[test]
    fn prop_uses_never_exceed_ceiling_after_status(
        gaps in proptest::collection::vec(0i64..10 * HOUR_MS, 1..40)
    ) {
        let h = harness();
        let max = h.config.max_uses_per_window as usize;
        let window = h.config.reset_window_ms();

        for gap in gaps {
            h.clock.advance_ms(gap);
            if !h.manager.status().limited {
                let _ = h.manager.record_use();
            }
            h.manager.status();

            let record = h.manager.engine().current_record();
            let now = h.clock.now_millis();
            prop_assert!(record.uses.len() <= max);
            prop_assert!(record.uses.iter().all(|&ts| ts > now - window));
        }
    }

    #[test]
    fn prop_status_is_idempotent(uses in 0usize..7, offset in 0i64..DAY_MS) {
        let h = harness();
        h.use_n(uses.min(5));
        h.clock.advance_ms(offset);

        let first = h.manager.status();
        let second = h.manager.status();
        prop_assert_eq!(first.limited, second.limited);
        prop_assert_eq!(first.remaining, second.remaining);
    }
}

#[test]
fn test_window_rollover_after_25_hours() {
    let h = harness();
    let signature = h.manager.signature();

    let start = NOW - 25 * HOUR_MS;
    let mut stale = UsageRecord::new(signature, start);
    for i in 0..5 {
        stale.push_use(start + i * 60_000);
    }
    stale.warning_shown = true;
    h.replicator().save(&stale);

    let status = h.manager.status();
    assert!(!status.limited);
    assert_eq!(status.remaining, 5);

    let record = h.manager.engine().current_record();
    assert!(record.uses.is_empty());
    assert_eq!(record.total_uses, 0);
    assert!(!record.warning_shown);
    assert_eq!(record.last_reset, NOW);
}

#[test]
fn test_replay_within_one_second_rejected() {
    let h = harness();
    assert!(h.manager.record_use());
    h.clock.advance_ms(999);
    assert!(!h.manager.record_use());
    assert_eq!(h.manager.engine().current_record().total_uses, 1);
}

#[test]
fn test_recovery_after_primary_deleted() {
    let h = harness();
    let replicator = h.replicator();
    h.use_n(3);

    let signature = h.manager.signature();
    let saved = replicator.load(&signature).unwrap();

    let primary = &replicator.locations(&signature, NOW)[0].key;
    h.persistent.remove(primary).unwrap();
    assert!(h.persistent.get(primary).unwrap().is_none());

    let recovered = replicator.load(&signature).unwrap();
    assert_eq!(recovered.signature, saved.signature);
    assert_eq!(recovered.uses, saved.uses);
    assert_eq!(recovered.total_uses, saved.total_uses);
    assert_eq!(h.manager.status().remaining, 2);
}

#[test]
fn test_override_precedence_and_expiry() {
    let h = harness();
    h.use_n(5);
    assert!(h.manager.status().limited);

    assert!(h.manager.activate_override(SECRET));
    let status = h.manager.status();
    assert!(!status.limited);
    assert!(status.override_active);

    let slot = h.manager.overrides().slot_key();
    assert!(h.persistent.get(&slot).unwrap().is_some());

    h.clock.advance_ms(24 * HOUR_MS);
    assert!(!h.manager.overrides().is_active());
    assert!(h.persistent.get(&slot).unwrap().is_none());
}

#[test]
fn test_record_eight_days_old_rejected() {
    let h = harness();
    let signature = h.manager.signature();

    let mut tampered = UsageRecord::new(signature.clone(), NOW - HOUR_MS);
    for i in 0..5 {
        tampered.push_use(NOW - HOUR_MS + i * 60_000);
    }
    tampered.first_use = NOW - 8 * DAY_MS;

    let validator = IntegrityValidator::new(&h.config);
    let value: serde_json::Value = serde_json::from_str(&tampered.to_json()).unwrap();
    assert!(!validator.validate(&value, NOW));

    let replicator = h.replicator();
    replicator.save(&tampered);
    assert!(replicator.load(&signature).is_none());

    let status = h.manager.status();
    assert!(!status.limited);
    assert_eq!(status.remaining, 5);
}

#[test]
fn test_record_scoped_to_signature() {
    let clock = ManualClock::new(NOW);
    let shared = MemoryBackend::new();

    let owner = harness_for("client-b", clock.clone(), shared.clone());
    owner.use_n(5);
    assert!(owner.manager.status().limited);

    let other = harness_for("client-a", clock, shared);
    let a = other.manager.signature();
    assert_ne!(a, owner.manager.signature());

    assert!(other.replicator().load(&a).is_none());
    let status = other.manager.status();
    assert!(!status.limited);
    assert_eq!(status.remaining, 5);
}

#[test]
fn test_signature_mismatch_never_loads() {
    let h = harness();
    let foreign = UsageRecord::new(ClientSignature::new("zzzz"), NOW);
    h.replicator().save(&foreign);

    let own = h.manager.signature();
    assert!(h.replicator().load(&own).is_none());
    assert!(h.replicator().load(&ClientSignature::new("zzzz")).is_some());
}
