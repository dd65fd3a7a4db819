//! Client-Side Quota Module
//!
//! Bounds how often one sensitive action may run within a rolling window,
//! tracked entirely on the client. State is replicated across several
//! storage locations so that clearing one does not reset the quota, and
//! every replica is validated before it is trusted.
//!
//! Client time and client storage are trusted. This deters casual reuse; it
//! does not stop a determined user who clears every location or spoofs the
//! signature.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Quota Manager                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   no override   ┌──────────────────┐  │
//! │  │ Override Channel │ ──────────────▶ │   Quota Engine   │  │
//! │  └──────────────────┘                 └──────────────────┘  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌────────────────────┐  ┌───────────────┐   │
//! │  │ Signature │  │ Storage Replicator │─▶│  Integrity    │   │
//! │  │ Generator │  │  (5 + session +    │  │  Validator    │   │
//! │  └───────────┘  │   cookie)          │  └───────────────┘   │
//! │                 └────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod notify;
pub mod override_token;
pub mod record;
pub mod replicator;
pub mod signature;
pub mod validator;

pub use backend::{
    CookieJar, FileBackend, FileCookieJar, MemoryBackend, MemoryCookieJar, StorageBackend,
    StorageSet,
};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{QuotaConfig, ReconcilePolicy};
pub use engine::{EngineStatus, QuotaEngine};
pub use error::{QuotaError, StorageError, ValidationError};
pub use manager::{QuotaManager, QuotaStatus};
pub use notify::{DelayedNotifier, NoopNotifier, TracingNotifier, UsageNotifier};
pub use override_token::{credential_digest, OverrideChannel, OverrideToken};
pub use record::UsageRecord;
pub use replicator::{SaveReport, StorageReplicator};
pub use signature::{
    ClientSignature, EnvironmentAttributes, EnvironmentProbe, HostEnvironment, SignatureGenerator,
    StaticEnvironment,
};
pub use validator::IntegrityValidator;
