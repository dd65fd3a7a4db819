//! Quota Configuration
//!
//! Immutable settings shared by every quota component. Built once at startup
//! and handed to each component, never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::QuotaError;

/// Default limits
pub const DEFAULT_MAX_USES_PER_WINDOW: u32 = 5;
pub const DEFAULT_RESET_WINDOW_HOURS: u64 = 24;
pub const DEFAULT_REPLAY_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_LOOKBACK_DAYS: u64 = 7;
pub const DEFAULT_ROTATION_BUCKET_HOURS: u64 = 12;
pub const DEFAULT_OVERRIDE_DURATION_HOURS: u64 = 24;
pub const DEFAULT_OVERRIDE_REMAINING: u32 = 999;
pub const DEFAULT_COOKIE_MAX_CHARS: usize = 100;
pub const DEFAULT_NOTIFICATION_DELAY_MS: u64 = 1500;
pub const DEFAULT_KEY_PREFIX: &str = "quota";

/// Schema tag written into every usage record
pub const RECORD_VERSION: &str = "1.0";

/// How `load` picks between several valid replicas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// First valid location in fixed priority order wins
    #[default]
    FirstValid,
    /// Valid replica with the newest `lastReset` wins, priority order breaks ties
    LatestReset,
}

/// Quota configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Ceiling: uses permitted within one window
    pub max_uses_per_window: u32,

    /// Window length in hours
    pub reset_window_hours: u64,

    /// Minimum spacing between two recorded uses
    pub replay_interval_ms: u64,

    /// Records with timestamps older than this are treated as corrupt
    pub lookback_days: u64,

    /// Width of the time bucket used by the rotating storage key
    pub rotation_bucket_hours: u64,

    /// Lifetime of an override token
    pub override_duration_hours: u64,

    /// `remaining` reported while an override is active
    pub override_remaining: u32,

    /// Cookie fragment length cap
    pub cookie_max_chars: usize,

    /// Delay before an advisory notice is delivered
    pub notification_delay_ms: u64,

    /// Prefix for every storage key
    pub key_prefix: String,

    /// Replica selection on load
    pub reconcile_policy: ReconcilePolicy,

    /// Hex SHA-256 of the override secret. `None` disables the override channel.
    pub override_credential_sha256: Option<String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_uses_per_window: DEFAULT_MAX_USES_PER_WINDOW,
            reset_window_hours: DEFAULT_RESET_WINDOW_HOURS,
            replay_interval_ms: DEFAULT_REPLAY_INTERVAL_MS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            rotation_bucket_hours: DEFAULT_ROTATION_BUCKET_HOURS,
            override_duration_hours: DEFAULT_OVERRIDE_DURATION_HOURS,
            override_remaining: DEFAULT_OVERRIDE_REMAINING,
            cookie_max_chars: DEFAULT_COOKIE_MAX_CHARS,
            notification_delay_ms: DEFAULT_NOTIFICATION_DELAY_MS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            reconcile_policy: ReconcilePolicy::default(),
            override_credential_sha256: None,
        }
    }
}

impl QuotaConfig {
    /// Create a new quota configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().apply_env_overrides()
    }

    /// Apply `QUOTAGUARD_*` environment overrides on top of `self`
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`, keyed by `QUOTAGUARD_*` names
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("QUOTAGUARD_MAX_USES") {
            if let Ok(limit) = val.parse::<u32>() {
                if limit > 0 {
                    self.max_uses_per_window = limit;
                }
            }
        }

        if let Some(val) = lookup("QUOTAGUARD_RESET_HOURS") {
            if let Ok(hours) = val.parse::<u64>() {
                if hours > 0 {
                    self.reset_window_hours = hours;
                }
            }
        }

        if let Some(val) = lookup("QUOTAGUARD_KEY_PREFIX") {
            if !val.is_empty() {
                self.key_prefix = val;
            }
        }

        if let Some(val) = lookup("QUOTAGUARD_OVERRIDE_SHA256") {
            self.override_credential_sha256 = Some(val.to_lowercase());
        }

        self
    }

    /// Reject settings the engine cannot operate with
    pub fn validate(&self) -> Result<(), QuotaError> {
        if self.max_uses_per_window == 0 {
            return Err(QuotaError::InvalidConfig(
                "max_uses_per_window must be > 0".to_string(),
            ));
        }
        let window_ms = positive_ms("reset_window_hours", self.reset_window_hours, HOUR_MS)?;
        let lookback_ms = positive_ms("lookback_days", self.lookback_days, DAY_MS)?;
        positive_ms("rotation_bucket_hours", self.rotation_bucket_hours, HOUR_MS)?;
        positive_ms("override_duration_hours", self.override_duration_hours, HOUR_MS)?;
        if lookback_ms < window_ms {
            return Err(QuotaError::InvalidConfig(
                "lookback horizon must cover at least one reset window".to_string(),
            ));
        }
        if i64::try_from(self.replay_interval_ms).is_err() {
            return Err(QuotaError::InvalidConfig(
                "replay_interval_ms is out of range".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(QuotaError::InvalidConfig(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if let Some(digest) = &self.override_credential_sha256 {
            let well_formed = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
            if !well_formed {
                return Err(QuotaError::InvalidConfig(
                    "override_credential_sha256 must be 64 hex characters".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Get window duration
    pub fn reset_window(&self) -> Duration {
        Duration::from_millis(self.reset_window_hours.saturating_mul(HOUR_MS))
    }

    /// Window length in milliseconds
    pub fn reset_window_ms(&self) -> i64 {
        to_millis(self.reset_window_hours, HOUR_MS)
    }

    /// Lookback horizon in milliseconds
    pub fn lookback_ms(&self) -> i64 {
        to_millis(self.lookback_days, DAY_MS)
    }

    /// Rotating key bucket width in milliseconds
    pub fn rotation_bucket_ms(&self) -> i64 {
        to_millis(self.rotation_bucket_hours, HOUR_MS).max(1)
    }

    /// Override token lifetime in milliseconds
    pub fn override_duration_ms(&self) -> i64 {
        to_millis(self.override_duration_hours, HOUR_MS)
    }

    /// Advisory notice delay
    pub fn notification_delay(&self) -> Duration {
        Duration::from_millis(self.notification_delay_ms)
    }
}

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// `count * unit` in milliseconds, `None` when it does not fit an `i64`
fn checked_millis(count: u64, unit: u64) -> Option<i64> {
    count
        .checked_mul(unit)
        .and_then(|ms| i64::try_from(ms).ok())
}

/// Saturating form for configs that skipped validation
fn to_millis(count: u64, unit: u64) -> i64 {
    checked_millis(count, unit).unwrap_or(i64::MAX)
}

fn positive_ms(field: &str, count: u64, unit: u64) -> Result<i64, QuotaError> {
    if count == 0 {
        return Err(QuotaError::InvalidConfig(format!("{} must be > 0", field)));
    }
    checked_millis(count, unit)
        .ok_or_else(|| QuotaError::InvalidConfig(format!("{} is out of range", field)))
}
