//! Client Signature
//!
//! A best-effort identity hint derived from environment attributes. It is a
//! 32-bit rolling hash rendered in base 36: collisions and spoofing are
//! expected. It scopes stored records and override tokens to one client but
//! authenticates nothing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Placeholder for an attribute the environment cannot report
pub const UNKNOWN_ATTRIBUTE: &str = "unknown";

/// Opaque per-client identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientSignature(String);

impl ClientSignature {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attributes feeding the signature, in hashing order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentAttributes {
    pub user_agent: Option<String>,
    pub language: Option<String>,
    /// Screen width and height in pixels
    pub screen: Option<(u32, u32)>,
    pub color_depth: Option<u32>,
    /// Minutes, positive west of UTC
    pub timezone_offset_minutes: Option<i32>,
    /// Checksum of an offscreen rendered graphic
    pub render_checksum: Option<String>,
    pub logical_cores: Option<u32>,
    /// Approximate device memory in GiB
    pub device_memory_gb: Option<u32>,
    pub platform: Option<String>,
    pub cookies_enabled: bool,
    pub workers_supported: bool,
}

impl EnvironmentAttributes {
    /// Join every attribute with `|`, substituting `unknown` for gaps
    pub fn canonical_string(&self) -> String {
        fn or_unknown<T: ToString>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN_ATTRIBUTE.to_string())
        }

        let screen = self
            .screen
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| UNKNOWN_ATTRIBUTE.to_string());

        [
            or_unknown(&self.user_agent),
            or_unknown(&self.language),
            screen,
            or_unknown(&self.color_depth),
            or_unknown(&self.timezone_offset_minutes),
            or_unknown(&self.render_checksum),
            or_unknown(&self.logical_cores),
            or_unknown(&self.device_memory_gb),
            or_unknown(&self.platform),
            self.cookies_enabled.to_string(),
            self.workers_supported.to_string(),
        ]
        .join("|")
    }
}

/// Source of environment attributes
pub trait EnvironmentProbe: Send + Sync {
    fn attributes(&self) -> EnvironmentAttributes;
}

/// Fixed attributes, for embedding hosts that collect them elsewhere
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    attributes: EnvironmentAttributes,
}

impl StaticEnvironment {
    pub fn new(attributes: EnvironmentAttributes) -> Self {
        Self { attributes }
    }
}

impl EnvironmentProbe for StaticEnvironment {
    fn attributes(&self) -> EnvironmentAttributes {
        self.attributes.clone()
    }
}

/// Attributes of the machine the CLI runs on.
///
/// A terminal has no screen geometry, colour depth or rendering surface, so
/// those slots stay `unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEnvironment;

impl EnvironmentProbe for HostEnvironment {
    fn attributes(&self) -> EnvironmentAttributes {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| UNKNOWN_ATTRIBUTE.to_string());

        let user_agent = format!(
            "{}/{} ({}; {}; {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH,
            host
        );

        let language = std::env::var("LANG")
            .ok()
            .filter(|l| !l.is_empty())
            .map(|l| l.split('.').next().unwrap_or(&l).replace('_', "-"));

        let local_minus_utc = chrono::Local::now().offset().local_minus_utc();

        let logical_cores = std::thread::available_parallelism()
            .ok()
            .map(|n| n.get() as u32);

        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        let device_memory_gb = if total > 0 {
            Some(((total as f64) / (1u64 << 30) as f64).round().max(1.0) as u32)
        } else {
            None
        };

        EnvironmentAttributes {
            user_agent: Some(user_agent),
            language,
            screen: None,
            color_depth: None,
            timezone_offset_minutes: Some(-local_minus_utc / 60),
            render_checksum: None,
            logical_cores,
            device_memory_gb,
            platform: Some(format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)),
            cookies_enabled: true,
            workers_supported: true,
        }
    }
}

/// Derives the client signature from an environment probe
#[derive(Clone)]
pub struct SignatureGenerator {
    probe: Arc<dyn EnvironmentProbe>,
}

impl fmt::Debug for SignatureGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureGenerator").finish_non_exhaustive()
    }
}

impl SignatureGenerator {
    pub fn new(probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self { probe }
    }

    /// Generator over a fixed attribute set
    pub fn with_attributes(attributes: EnvironmentAttributes) -> Self {
        Self::new(Arc::new(StaticEnvironment::new(attributes)))
    }

    /// Generator over the host machine
    pub fn host() -> Self {
        Self::new(Arc::new(HostEnvironment))
    }

    /// Compute the signature for the current environment
    pub fn compute(&self) -> ClientSignature {
        let canonical = self.probe.attributes().canonical_string();
        ClientSignature(to_base36(rolling_hash(&canonical).unsigned_abs()))
    }
}

/// `h = h * 31 + c` over UTF-16 code units, wrapping at 32 bits
fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32)
    })
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
