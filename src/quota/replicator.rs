//! Storage Replicator
//!
//! Writes the usage record to every replica location and reads it back from
//! the first one that survives validation. Clearing a single location does
//! not reset the quota.
//!
//! # Locations
//!
//! ```text
//! persistent   {prefix}_usage_data             primary
//!              {prefix}_backup_data            backup
//!              {prefix}_{signature}_data       signature-derived
//!              {prefix}_session_{bucket}       12h rotating bucket
//!              {prefix}_secret_{year}_data     derived
//! session      {prefix}_temp_data              write-only copy
//! cookie       {prefix}_bk                     truncated base64 fragment
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Datelike;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::backend::{CookieJar, SameSite, SideChannelCookie, StorageBackend};
use super::clock::{Clock, Timestamp};
use super::config::{QuotaConfig, ReconcilePolicy};
use super::error::{QuotaError, ValidationError};
use super::record::UsageRecord;
use super::signature::ClientSignature;
use super::validator::IntegrityValidator;

/// Role of a persistent replica location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Primary,
    Backup,
    SignatureDerived,
    Rotating,
    Derived,
}

/// A persistent location and the key it resolves to at a given time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaLocation {
    pub kind: LocationKind,
    pub key: String,
}

/// Outcome of a fan-out write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Persistent locations that accepted the write
    pub persisted: usize,
    /// Persistent locations attempted
    pub attempted: usize,
    pub session_written: bool,
    pub cookie_written: bool,
}

impl SaveReport {
    /// Nothing at all accepted the record
    pub fn is_lost(&self) -> bool {
        self.persisted == 0 && !self.session_written && !self.cookie_written
    }
}

/// Fans usage records out to several storage mechanisms
#[derive(Clone)]
pub struct StorageReplicator {
    config: Arc<QuotaConfig>,
    validator: IntegrityValidator,
    clock: Arc<dyn Clock>,
    persistent: Arc<dyn StorageBackend>,
    session: Arc<dyn StorageBackend>,
    cookies: Arc<dyn CookieJar>,
}

impl fmt::Debug for StorageReplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageReplicator")
            .field("key_prefix", &self.config.key_prefix)
            .field("reconcile_policy", &self.config.reconcile_policy)
            .finish_non_exhaustive()
    }
}

impl StorageReplicator {
    pub fn new(
        config: Arc<QuotaConfig>,
        clock: Arc<dyn Clock>,
        persistent: Arc<dyn StorageBackend>,
        session: Arc<dyn StorageBackend>,
        cookies: Arc<dyn CookieJar>,
    ) -> Self {
        Self {
            validator: IntegrityValidator::new(&config),
            config,
            clock,
            persistent,
            session,
            cookies,
        }
    }

    /// Persistent locations for `signature` at time `now`, in probe order
    pub fn locations(&self, signature: &ClientSignature, now: Timestamp) -> Vec<ReplicaLocation> {
        let prefix = &self.config.key_prefix;
        let bucket = now.div_euclid(self.config.rotation_bucket_ms());
        let year = chrono::DateTime::from_timestamp_millis(now)
            .map(|dt| dt.year())
            .unwrap_or(1970);

        vec![
            ReplicaLocation {
                kind: LocationKind::Primary,
                key: format!("{}_usage_data", prefix),
            },
            ReplicaLocation {
                kind: LocationKind::Backup,
                key: format!("{}_backup_data", prefix),
            },
            ReplicaLocation {
                kind: LocationKind::SignatureDerived,
                key: format!("{}_{}_data", prefix, signature),
            },
            ReplicaLocation {
                kind: LocationKind::Rotating,
                key: format!("{}_session_{}", prefix, bucket),
            },
            ReplicaLocation {
                kind: LocationKind::Derived,
                key: format!("{}_secret_{}_data", prefix, year),
            },
        ]
    }

    /// Key of the transient session copy
    pub fn session_key(&self) -> String {
        format!("{}_temp_data", self.config.key_prefix)
    }

    /// Name of the side-channel cookie
    pub fn cookie_name(&self) -> String {
        format!("{}_bk", self.config.key_prefix)
    }

    /// Find the record for `signature`, or `None` when no location holds a
    /// valid one. Failures on individual locations are logged and skipped.
    pub fn load(&self, signature: &ClientSignature) -> Option<UsageRecord> {
        let now = self.clock.now_millis();
        let mut best: Option<UsageRecord> = None;

        for location in self.locations(signature, now) {
            let record = match self.read_location(&location.key, signature, now) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    debug!(key = %location.key, error = %e, "Skipping replica location");
                    continue;
                }
            };

            match self.config.reconcile_policy {
                ReconcilePolicy::FirstValid => return Some(record),
                ReconcilePolicy::LatestReset => {
                    let newer = best
                        .as_ref()
                        .map_or(true, |current| record.last_reset > current.last_reset);
                    if newer {
                        best = Some(record);
                    }
                }
            }
        }

        best
    }

    fn read_location(
        &self,
        key: &str,
        signature: &ClientSignature,
        now: Timestamp,
    ) -> Result<Option<UsageRecord>, QuotaError> {
        let Some(stored) = self.persistent.get(key)? else {
            return Ok(None);
        };

        let value: serde_json::Value = serde_json::from_str(&stored)
            .map_err(|e| ValidationError::Decode(e.to_string()))?;
        let record = self.validator.parse(value, now)?;

        if &record.signature != signature {
            return Err(QuotaError::SignatureMismatch {
                expected: signature.to_string(),
                found: record.signature.to_string(),
            });
        }

        Ok(Some(record))
    }

    /// Write `record` everywhere. Never fails; see the report for what stuck.
    pub fn save(&self, record: &UsageRecord) -> SaveReport {
        let now = self.clock.now_millis();
        let data = record.to_json();
        let mut report = SaveReport::default();

        for location in self.locations(&record.signature, now) {
            report.attempted += 1;
            match self.persistent.set(&location.key, &data) {
                Ok(()) => report.persisted += 1,
                Err(e) => debug!(key = %location.key, error = %e, "Storage save failed"),
            }
        }

        let session_key = self.session_key();
        match self.session.set(&session_key, &data) {
            Ok(()) => report.session_written = true,
            Err(e) => debug!(key = %session_key, error = %e, "Session storage failed"),
        }

        match self.cookies.set_cookie(self.side_channel_cookie(&data, now)) {
            Ok(()) => report.cookie_written = true,
            Err(e) => debug!(error = %e, "Cookie backup failed"),
        }

        report
    }

    fn side_channel_cookie(&self, data: &str, now: Timestamp) -> SideChannelCookie {
        let encoded = BASE64.encode(data);
        let value: String = encoded.chars().take(self.config.cookie_max_chars).collect();

        SideChannelCookie {
            name: self.cookie_name(),
            value,
            max_age_secs: self.config.reset_window().as_secs(),
            same_site: SameSite::Strict,
            set_at: now,
        }
    }
}
