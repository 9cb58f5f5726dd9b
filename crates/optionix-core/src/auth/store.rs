//! Durable persistence of the single bearer credential.
//!
//! Every backend stores the same versioned envelope so the on-disk (or
//! in-keychain) layout can be migrated later. Reads never fail: anything that
//! cannot be decoded is reported with `warn!` and treated as "no credential".

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, ConfigError, StorageBackend, APP_NAME};

/// Keychain service name shared by all platforms
const SERVICE_NAME: &str = APP_NAME;

/// Current envelope layout. Bump when the stored shape changes.
const ENVELOPE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Refusing to store an empty credential")]
    EmptyToken,

    #[error("Failed to write credential file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode credential: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Stored credential is unreadable: {0}")]
    Corrupt(String),

    #[error("Stored credential has unsupported version {0}")]
    UnsupportedVersion(u32),

    #[error("No location for credential storage: {0}")]
    Location(#[from] ConfigError),
}

/// Key-value persistence of one credential.
///
/// `save` either fully replaces the stored value or returns an error; `load`
/// returns `None` for absent and unreadable values alike; `clear` is
/// idempotent.
pub trait TokenStore: Send + Sync {
    fn save(&self, token: &str) -> Result<(), StoreError>;

    fn load(&self) -> Option<String>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Clear only if the stored credential is still `expected`.
    ///
    /// The compare and the clear happen under the same lock as `save`, so a
    /// credential written in between is never removed. Returns whether the
    /// credential was cleared.
    fn clear_if(&self, expected: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    key: String,
    token: String,
    saved_at: DateTime<Utc>,
}

impl Envelope {
    fn encode(key: &str, token: &str) -> Result<String, StoreError> {
        if token.is_empty() {
            return Err(StoreError::EmptyToken);
        }
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            key: key.to_string(),
            token: token.to_string(),
            saved_at: Utc::now(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    fn decode(raw: &str, key: &str) -> Result<String, StoreError> {
        // Read the version first so future layouts are not misparsed as corrupt.
        #[derive(Deserialize)]
        struct Versioned {
            version: u32,
        }
        let versioned: Versioned =
            serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if versioned.version != ENVELOPE_VERSION {
            return Err(StoreError::UnsupportedVersion(versioned.version));
        }

        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if envelope.key != key {
            return Err(StoreError::Corrupt(format!(
                "stored under '{}', expected '{}'",
                envelope.key, key
            )));
        }
        if envelope.token.is_empty() {
            return Err(StoreError::Corrupt("empty token".to_string()));
        }
        Ok(envelope.token)
    }
}

/// Open the store selected by `config`.
pub fn open_store(config: &Config) -> Result<Arc<dyn TokenStore>, StoreError> {
    let key = config.platform.storage_key();
    let store: Arc<dyn TokenStore> = match config.storage {
        StorageBackend::Keyring => Arc::new(KeyringStore::new(key)?),
        StorageBackend::File => Arc::new(FileStore::new(config.data_dir()?, key)),
    };
    debug!(backend = ?config.storage, key, "Credential store opened");
    Ok(store)
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    token: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for MemoryStore {
    fn save(&self, token: &str) -> Result<(), StoreError> {
        if token.is_empty() {
            return Err(StoreError::EmptyToken);
        }
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    fn load(&self) -> Option<String> {
        self.slot().clone()
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }

    fn clear_if(&self, expected: &str) -> Result<bool, StoreError> {
        let mut slot = self.slot();
        if slot.as_deref() != Some(expected) {
            return Ok(false);
        }
        *slot = None;
        Ok(true)
    }
}

// ============================================================================
// File
// ============================================================================

/// Credential persisted as `<dir>/<key>.json`.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a concurrent or interrupted reader sees either the old or the new token.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    key: String,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, key: &str) -> Self {
        let dir = dir.into();
        Self {
            path: dir.join(format!("{}.json", key)),
            key: key.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    fn write_atomic(&self, contents: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        let result = (|| {
            let mut options = OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TokenStore for FileStore {
    fn save(&self, token: &str) -> Result<(), StoreError> {
        let contents = Envelope::encode(&self.key, token)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.write_atomic(&contents)
    }

    fn load(&self) -> Option<String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read credential file");
                return None;
            }
        };
        match Envelope::decode(&raw, &self.key) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Ignoring stored credential");
                None
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.remove()
    }

    fn clear_if(&self, expected: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if self.load().as_deref() != Some(expected) {
            return Ok(false);
        }
        self.remove()?;
        Ok(true)
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Credential persisted in the OS keychain under service `optionix`.
///
/// Backed by the platform store (macOS Keychain, Windows Credential Manager,
/// Secret Service on Linux) through the `keyring` platform features. Tests
/// swap in `keyring::mock` explicitly.
pub struct KeyringStore {
    entry: Entry,
    key: String,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore").field("key", &self.key).finish()
    }
}

impl KeyringStore {
    pub fn new(key: &str) -> Result<Self, StoreError> {
        let entry = Entry::new(SERVICE_NAME, key)?;
        Ok(Self {
            entry,
            key: key.to_string(),
            write_lock: Mutex::new(()),
        })
    }

    fn remove(&self) -> Result<(), StoreError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TokenStore for KeyringStore {
    fn save(&self, token: &str) -> Result<(), StoreError> {
        let contents = Envelope::encode(&self.key, token)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.entry.set_password(&contents)?;
        Ok(())
    }

    fn load(&self) -> Option<String> {
        let raw = match self.entry.get_password() {
            Ok(raw) => raw,
            Err(keyring::Error::NoEntry) => return None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read credential from keychain");
                return None;
            }
        };
        match Envelope::decode(&raw, &self.key) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Ignoring keychain credential");
                None
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.remove()
    }

    fn clear_if(&self, expected: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if self.load().as_deref() != Some(expected) {
            return Ok(false);
        }
        self.remove()?;
        Ok(true)
    }
}
