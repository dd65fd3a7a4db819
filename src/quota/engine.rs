//! Quota Engine
//!
//! Window state machine and use counting for one client. A record is either
//! inside its window or past it; the move to a fresh window happens lazily
//! on the next query or use, never on a timer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::clock::{Clock, Timestamp};
use super::config::QuotaConfig;
use super::error::QuotaError;
use super::notify::UsageNotifier;
use super::record::UsageRecord;
use super::replicator::StorageReplicator;
use super::signature::SignatureGenerator;

const HOUR_MS: i64 = 3_600_000;

/// Decision returned by [`QuotaEngine::get_status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// No uses left in the window
    pub limited: bool,

    /// Uses left in the window
    pub remaining: u32,

    /// Whole hours, rounded up, until the window resets
    pub reset_in_hours: u32,
}

/// Owns window logic, use recording and the limit decision
pub struct QuotaEngine {
    config: Arc<QuotaConfig>,
    signatures: SignatureGenerator,
    replicator: StorageReplicator,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn UsageNotifier>,

    /// `remaining` seen by the previous status query of this instance.
    /// Not persisted: a new engine over the same storage notifies again.
    last_remaining: Mutex<Option<u32>>,
}

impl fmt::Debug for QuotaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaEngine")
            .field("max_uses_per_window", &self.config.max_uses_per_window)
            .field("replicator", &self.replicator)
            .finish_non_exhaustive()
    }
}

impl QuotaEngine {
    pub fn new(
        config: Arc<QuotaConfig>,
        signatures: SignatureGenerator,
        replicator: StorageReplicator,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn UsageNotifier>,
    ) -> Self {
        Self {
            config,
            signatures,
            replicator,
            clock,
            notifier,
            last_remaining: Mutex::new(None),
        }
    }

    /// The record as the engine sees it right now: loaded or created, rolled
    /// over or pruned. Nothing is persisted.
    pub fn current_record(&self) -> UsageRecord {
        self.current_record_at(self.clock.now_millis())
    }

    fn current_record_at(&self, now: Timestamp) -> UsageRecord {
        let signature = self.signatures.compute();
        let window_ms = self.config.reset_window_ms();

        let mut record = match self.replicator.load(&signature) {
            Some(record) => record,
            None => {
                debug!(signature = %signature, "No valid usage record found, starting fresh");
                UsageRecord::new(signature, now)
            }
        };

        if record.window_expired(now, window_ms) {
            info!(
                signature = %record.signature,
                previous_reset = record.last_reset,
                "Usage window expired, resetting"
            );
            record.roll_window(now);
        } else {
            record.prune(now, window_ms);
        }

        record
    }

    /// May the guarded action proceed?
    pub fn get_status(&self) -> EngineStatus {
        let now = self.clock.now_millis();
        let mut record = self.current_record_at(now);

        let used = u32::try_from(record.uses.len()).unwrap_or(u32::MAX);
        let remaining = self.config.max_uses_per_window.saturating_sub(used);
        let limited = remaining == 0;

        if limited && !record.warning_shown {
            record.warning_shown = true;
            let report = self.replicator.save(&record);
            debug!(persisted = report.persisted, "Limit reached, warning flag stored");
        }

        self.observe_remaining(remaining);

        let until_reset = record
            .last_reset
            .saturating_add(self.config.reset_window_ms())
            .saturating_sub(now)
            .max(0);
        let reset_in_hours =
            u32::try_from(until_reset.saturating_add(HOUR_MS - 1) / HOUR_MS).unwrap_or(u32::MAX);

        EngineStatus {
            limited,
            remaining,
            reset_in_hours,
        }
    }

    /// Fire the advisory notice when `remaining` first lands on 2 or 1
    fn observe_remaining(&self, remaining: u32) {
        let previous = match self.last_remaining.lock() {
            Ok(mut last) => last.replace(remaining),
            Err(_) => return,
        };

        if matches!(remaining, 1 | 2) && previous != Some(remaining) {
            self.notifier.notify(remaining);
        }
    }

    /// Record that the guarded action ran. Returns false on rapid replay.
    ///
    /// The ceiling is not checked here: callers consult
    /// [`get_status`](Self::get_status) first.
    pub fn record_use(&self) -> bool {
        self.try_record_use().is_ok()
    }

    /// Like [`record_use`](Self::record_use) but returns the updated record
    /// or the reason for rejection.
    pub fn try_record_use(&self) -> Result<UsageRecord, QuotaError> {
        let now = self.clock.now_millis();
        let mut record = self.current_record_at(now);

        if let Some(latest) = record.latest_use() {
            let elapsed_ms = now - latest;
            if elapsed_ms < i64::try_from(self.config.replay_interval_ms).unwrap_or(i64::MAX) {
                warn!(elapsed_ms, "Suspicious activity detected, use rejected");
                return Err(QuotaError::RapidReplay { elapsed_ms });
            }
        }

        record.push_use(now);

        let report = self.replicator.save(&record);
        if report.is_lost() {
            warn!("Use accepted but no storage location is writable");
        } else {
            debug!(
                persisted = report.persisted,
                attempted = report.attempted,
                uses = record.uses.len(),
                "Use recorded"
            );
        }

        Ok(record)
    }
}
