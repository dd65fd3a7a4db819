//! Storage Backends
//!
//! Key/value locations the replicator writes to, plus the cookie side
//! channel. Every backend is independently fallible; the replicator treats
//! each one as best-effort.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::clock::Timestamp;
use super::error::StorageError;

/// A text key/value storage mechanism
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory backend. Clones share the same entries.
///
/// Can be switched to read-only or unavailable, or told to fail on specific
/// keys, to stand in for a sandboxed or full storage area.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, String>>>,
    failing_keys: Arc<RwLock<HashSet<String>>>,
    read_only: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Reject every operation
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject every operation on `key`
    pub fn fail_key(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.write() {
            keys.insert(key.to_string());
        }
    }

    /// Snapshot of all keys currently stored
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    fn guard(&self, key: &str) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable(key, "backend disabled"));
        }
        let failing = self
            .failing_keys
            .read()
            .map(|keys| keys.contains(key))
            .unwrap_or(false);
        if failing {
            return Err(unavailable(key, "location rejected the operation"));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.guard(key)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| unavailable(key, "lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.guard(key)?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly(key.to_string()));
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| unavailable(key, "lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.guard(key)?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly(key.to_string()));
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| unavailable(key, "lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(name)
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Cookie same-site restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A cookie written to the side channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelCookie {
    pub name: String,
    pub value: String,
    pub max_age_secs: u64,
    pub same_site: SameSite,
    /// When the cookie was written
    pub set_at: Timestamp,
}

impl SideChannelCookie {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.set_at + (self.max_age_secs as i64) * 1000
    }

    /// `Set-Cookie` style rendering
    pub fn header_value(&self) -> String {
        format!(
            "{}={}; max-age={}; SameSite={:?}",
            self.name, self.value, self.max_age_secs, self.same_site
        )
    }
}

/// Cookie-like side channel
pub trait CookieJar: Send + Sync {
    fn set_cookie(&self, cookie: SideChannelCookie) -> Result<(), StorageError>;

    /// Unexpired cookie named `name`
    fn get_cookie(&self, name: &str, now: Timestamp)
        -> Result<Option<SideChannelCookie>, StorageError>;
}

/// In-memory cookie jar. Clones share the same cookies.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    cookies: Arc<RwLock<HashMap<String, SideChannelCookie>>>,
    blocked: Arc<AtomicBool>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every cookie, as a browser with cookies disabled would
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }
}

impl CookieJar for MemoryCookieJar {
    fn set_cookie(&self, cookie: SideChannelCookie) -> Result<(), StorageError> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(unavailable(&cookie.name, "cookies disabled"));
        }
        let mut cookies = self
            .cookies
            .write()
            .map_err(|_| unavailable(&cookie.name, "lock poisoned"))?;
        cookies.insert(cookie.name.clone(), cookie);
        Ok(())
    }

    fn get_cookie(
        &self,
        name: &str,
        now: Timestamp,
    ) -> Result<Option<SideChannelCookie>, StorageError> {
        let cookies = self
            .cookies
            .read()
            .map_err(|_| unavailable(name, "lock poisoned"))?;
        Ok(cookies.get(name).filter(|c| !c.is_expired(now)).cloned())
    }
}

/// Cookie jar persisted as a JSON map in a single file
#[derive(Debug, Clone)]
pub struct FileCookieJar {
    path: PathBuf,
}

impl FileCookieJar {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read_all(&self) -> Result<HashMap<String, SideChannelCookie>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map_err(|e| unavailable(&self.path.display().to_string(), &e.to_string()))
    }
}

impl CookieJar for FileCookieJar {
    fn set_cookie(&self, cookie: SideChannelCookie) -> Result<(), StorageError> {
        // A corrupt jar is replaced rather than blocking the write.
        let mut cookies = self.read_all().unwrap_or_default();
        cookies.insert(cookie.name.clone(), cookie);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&cookies)
            .map_err(|e| unavailable(&self.path.display().to_string(), &e.to_string()))?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    fn get_cookie(
        &self,
        name: &str,
        now: Timestamp,
    ) -> Result<Option<SideChannelCookie>, StorageError> {
        Ok(self
            .read_all()?
            .remove(name)
            .filter(|c| !c.is_expired(now)))
    }
}

/// The three storage mechanisms a quota manager writes to
#[derive(Clone)]
pub struct StorageSet {
    /// Replica locations and the override slot
    pub persistent: Arc<dyn StorageBackend>,
    /// Transient per-session copy
    pub session: Arc<dyn StorageBackend>,
    /// Cookie side channel
    pub cookies: Arc<dyn CookieJar>,
}

impl StorageSet {
    /// Everything in memory; nothing outlives the process
    pub fn in_memory() -> Self {
        Self {
            persistent: Arc::new(MemoryBackend::new()),
            session: Arc::new(MemoryBackend::new()),
            cookies: Arc::new(MemoryCookieJar::new()),
        }
    }

    /// Persistent locations under `dir/local`, cookies in `dir/cookies.json`,
    /// session copy in memory
    pub fn on_disk<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            persistent: Arc::new(FileBackend::new(dir.join("local"))),
            session: Arc::new(MemoryBackend::new()),
            cookies: Arc::new(FileCookieJar::new(dir.join("cookies.json"))),
        }
    }
}

impl std::fmt::Debug for StorageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSet").finish_non_exhaustive()
    }
}

fn unavailable(key: &str, reason: &str) -> StorageError {
    StorageError::Unavailable {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
