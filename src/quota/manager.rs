//! Quota Manager
//!
//! Query interface for the UI layer. The override channel is consulted
//! first; only without an active override does the engine decide.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::backend::StorageSet;
use super::clock::Clock;
use super::config::QuotaConfig;
use super::engine::{EngineStatus, QuotaEngine};
use super::error::QuotaError;
use super::notify::UsageNotifier;
use super::override_token::OverrideChannel;
use super::record::UsageRecord;
use super::replicator::StorageReplicator;
use super::signature::{ClientSignature, SignatureGenerator};

/// Effective status shown to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// Whether the guarded action is currently blocked
    pub limited: bool,

    /// Uses left, or the fixed sentinel while overridden
    pub remaining: u32,

    /// Hours until the window resets (0 while overridden)
    pub reset_in_hours: u32,

    /// An administrative override is active
    #[serde(rename = "override")]
    pub override_active: bool,
}

impl QuotaStatus {
    fn overridden(remaining: u32) -> Self {
        Self {
            limited: false,
            remaining,
            reset_in_hours: 0,
            override_active: true,
        }
    }
}

impl From<EngineStatus> for QuotaStatus {
    fn from(status: EngineStatus) -> Self {
        Self {
            limited: status.limited,
            remaining: status.remaining,
            reset_in_hours: status.reset_in_hours,
            override_active: false,
        }
    }
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.override_active {
            write!(f, "unrestricted (override active)")
        } else if self.limited {
            write!(f, "limit reached ({}h)", self.reset_in_hours)
        } else {
            write!(f, "{} left", self.remaining)
        }
    }
}

/// Quota manager
pub struct QuotaManager {
    config: Arc<QuotaConfig>,
    signatures: SignatureGenerator,
    engine: QuotaEngine,
    overrides: OverrideChannel,
}

impl fmt::Debug for QuotaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaManager")
            .field("engine", &self.engine)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

impl QuotaManager {
    /// Wire every component from one configuration value
    pub fn new(
        config: QuotaConfig,
        signatures: SignatureGenerator,
        clock: Arc<dyn Clock>,
        storage: StorageSet,
        notifier: Arc<dyn UsageNotifier>,
    ) -> Result<Self, QuotaError> {
        config.validate()?;
        let config = Arc::new(config);

        let replicator = StorageReplicator::new(
            Arc::clone(&config),
            Arc::clone(&clock),
            Arc::clone(&storage.persistent),
            storage.session,
            storage.cookies,
        );
        let engine = QuotaEngine::new(
            Arc::clone(&config),
            signatures.clone(),
            replicator,
            Arc::clone(&clock),
            notifier,
        );
        let overrides = OverrideChannel::new(
            Arc::clone(&config),
            signatures.clone(),
            clock,
            storage.persistent,
        );

        Ok(Self {
            config,
            signatures,
            engine,
            overrides,
        })
    }

    /// May the guarded action proceed?
    pub fn status(&self) -> QuotaStatus {
        if self.overrides.is_active() {
            return QuotaStatus::overridden(self.config.override_remaining);
        }
        self.engine.get_status().into()
    }

    /// Record that the guarded action ran. False on rapid replay.
    pub fn record_use(&self) -> bool {
        self.engine.record_use()
    }

    /// Like [`record_use`](Self::record_use) with the rejection reason
    pub fn try_record_use(&self) -> Result<UsageRecord, QuotaError> {
        self.engine.try_record_use()
    }

    /// Forward an operator-supplied secret to the override channel
    pub fn activate_override(&self, secret: &str) -> bool {
        self.overrides.activate(secret)
    }

    pub fn override_active(&self) -> bool {
        self.overrides.is_active()
    }

    /// Signature of the current client
    pub fn signature(&self) -> ClientSignature {
        self.signatures.compute()
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn engine(&self) -> &QuotaEngine {
        &self.engine
    }

    pub fn overrides(&self) -> &OverrideChannel {
        &self.overrides
    }
}
