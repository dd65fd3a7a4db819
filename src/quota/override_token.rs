//! Override Channel
//!
//! A static bearer credential that unlocks a time-bounded bypass bound to
//! the client signature. Anyone who learns the secret can unlock any client;
//! the channel is an operator escape hatch, not an access control.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::StorageBackend;
use super::clock::{Clock, Timestamp};
use super::config::QuotaConfig;
use super::error::QuotaError;
use super::signature::{ClientSignature, SignatureGenerator};

/// Bypass grant stored in the override slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideToken {
    pub expires_at: Timestamp,
    pub bound_signature: ClientSignature,
    pub issued_at: Timestamp,
}

impl OverrideToken {
    /// Whether the token still unlocks `signature` at `now`
    pub fn is_valid_for(&self, signature: &ClientSignature, now: Timestamp) -> bool {
        now < self.expires_at && &self.bound_signature == signature
    }

    /// `base64(json)` as stored in the slot
    pub fn encode(&self) -> String {
        BASE64.encode(serde_json::to_string(self).unwrap_or_default())
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = BASE64.decode(raw.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Hex SHA-256 of an override secret, the form kept in configuration
pub fn credential_digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Issues and checks override tokens
#[derive(Clone)]
pub struct OverrideChannel {
    config: Arc<QuotaConfig>,
    signatures: SignatureGenerator,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn StorageBackend>,
}

impl fmt::Debug for OverrideChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideChannel")
            .field("slot", &self.slot_key())
            .field("enabled", &self.config.override_credential_sha256.is_some())
            .finish_non_exhaustive()
    }
}

impl OverrideChannel {
    pub fn new(
        config: Arc<QuotaConfig>,
        signatures: SignatureGenerator,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            config,
            signatures,
            clock,
            storage,
        }
    }

    /// Storage key of the override slot
    pub fn slot_key(&self) -> String {
        format!("{}_override_key", self.config.key_prefix)
    }

    /// Whether a valid override is in place for this client
    pub fn is_active(&self) -> bool {
        self.active_token().is_some()
    }

    /// The valid token for this client, if any. Expired, foreign or
    /// undecodable tokens are deleted on the way.
    pub fn active_token(&self) -> Option<OverrideToken> {
        let key = self.slot_key();
        let raw = match self.storage.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(key = %key, error = %e, "Override slot unreadable");
                return None;
            }
        };

        let signature = self.signatures.compute();
        let now = self.clock.now_millis();

        match OverrideToken::decode(&raw) {
            Some(token) if token.is_valid_for(&signature, now) => Some(token),
            stale => {
                if let Some(token) = stale {
                    debug!(expires_at = token.expires_at, "Override token no longer valid");
                }
                if let Err(e) = self.storage.remove(&key) {
                    debug!(key = %key, error = %e, "Failed to clear override slot");
                }
                None
            }
        }
    }

    /// Unlock this client if `secret` matches the configured credential
    pub fn activate(&self, secret: &str) -> bool {
        match self.try_activate(secret) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Override activation refused");
                false
            }
        }
    }

    /// Like [`activate`](Self::activate) but returns the issued token
    pub fn try_activate(&self, secret: &str) -> Result<OverrideToken, QuotaError> {
        let expected = self
            .config
            .override_credential_sha256
            .as_deref()
            .ok_or(QuotaError::InvalidOverrideCredential)?;

        if !credential_digest(secret).eq_ignore_ascii_case(expected) {
            return Err(QuotaError::InvalidOverrideCredential);
        }

        let now = self.clock.now_millis();
        let token = OverrideToken {
            expires_at: now.saturating_add(self.config.override_duration_ms()),
            bound_signature: self.signatures.compute(),
            issued_at: now,
        };

        self.storage.set(&self.slot_key(), &token.encode())?;
        info!(
            signature = %token.bound_signature,
            expires_at = token.expires_at,
            "Admin override enabled"
        );

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::backend::MemoryBackend;
    use crate::quota::clock::ManualClock;
    use crate::quota::signature::EnvironmentAttributes;

    const NOW: i64 = 1_700_000_000_000;
    const SECRET: &str = "correct horse battery staple";

    fn generator(agent: &str) -> SignatureGenerator {
        SignatureGenerator::with_attributes(EnvironmentAttributes {
            user_agent: Some(agent.to_string()),
            ..EnvironmentAttributes::default()
        })
    }

    fn channel(clock: &ManualClock, storage: &MemoryBackend, agent: &str) -> OverrideChannel {
        let config = QuotaConfig {
            override_credential_sha256: Some(credential_digest(SECRET)),
            ..QuotaConfig::default()
        };
        OverrideChannel::new(
            Arc::new(config),
            generator(agent),
            Arc::new(clock.clone()),
            Arc::new(storage.clone()),
        )
    }

    #[test]
    fn test_credential_digest() {
        assert_eq!(
            credential_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_inactive_without_token() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        assert!(!channel(&clock, &storage, "a").is_active());
    }

    #[test]
    fn test_activate_with_correct_secret() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        let channel = channel(&clock, &storage, "a");

        let token = channel.try_activate(SECRET).unwrap();
        assert_eq!(token.issued_at, NOW);
        assert_eq!(token.expires_at, NOW + 24 * 3_600_000);
        assert!(channel.is_active());
        assert_eq!(channel.active_token(), Some(token));
    }

    #[test]
    fn test_wrong_secret_writes_nothing() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        let channel = channel(&clock, &storage, "a");

        assert!(matches!(
            channel.try_activate("guess"),
            Err(QuotaError::InvalidOverrideCredential)
        ));
        assert!(!channel.activate("guess"));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_no_credential_configured_disables_channel() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        let channel = OverrideChannel::new(
            Arc::new(QuotaConfig::default()),
            generator("a"),
            Arc::new(clock),
            Arc::new(storage.clone()),
        );
        assert!(!channel.activate(SECRET));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_expired_token_cleared_lazily() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        let channel = channel(&clock, &storage, "a");
        assert!(channel.activate(SECRET));

        clock.advance_hours(24);
        assert_eq!(storage.len(), 1);
        assert!(!channel.is_active());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_token_bound_to_signature() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        assert!(channel(&clock, &storage, "a").activate(SECRET));

        let other = channel(&clock, &storage, "b");
        assert!(!other.is_active());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_garbage_in_slot_cleared() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        let channel = channel(&clock, &storage, "a");
        storage.set(&channel.slot_key(), "%%%not-base64").unwrap();

        assert!(!channel.is_active());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_unwritable_slot_fails_activation() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        storage.set_read_only(true);
        assert!(!channel(&clock, &storage, "a").activate(SECRET));
    }

    #[test]
    fn test_unbounded_duration_saturates_expiry() {
        let clock = ManualClock::new(NOW);
        let storage = MemoryBackend::new();
        let config = QuotaConfig {
            override_duration_hours: u64::MAX / 1000,
            override_credential_sha256: Some(credential_digest(SECRET)),
            ..QuotaConfig::default()
        };
        let channel = OverrideChannel::new(
            Arc::new(config),
            generator("a"),
            Arc::new(clock),
            Arc::new(storage),
        );
        let token = channel.try_activate(SECRET).unwrap();
        assert_eq!(token.expires_at, i64::MAX);
        assert!(channel.is_active());
    }

    #[test]
    fn test_token_encoding_field_names() {
        let token = OverrideToken {
            expires_at: 2,
            bound_signature: ClientSignature::new("abc"),
            issued_at: 1,
        };
        let json = String::from_utf8(BASE64.decode(token.encode()).unwrap()).unwrap();
        assert_eq!(json, r#"{"expiresAt":2,"boundSignature":"abc","issuedAt":1}"#);
        assert_eq!(OverrideToken::decode(&token.encode()), Some(token));
    }
}
