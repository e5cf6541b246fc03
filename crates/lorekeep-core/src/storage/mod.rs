//! Whole-document JSON storage.
//!
//! Every persistent structure lives under one logical key (see [`keys`]) and
//! is read and written as a single JSON document. [`Storage`] wraps a
//! [`Backend`] and gives callers the forgiving contract the pipeline relies
//! on:
//!
//! - `get(key, default)` never fails. Absent, unreadable, or undecodable
//!   documents yield the caller's default; corruption is logged.
//! - `set`, `delete` report success as a `bool` and log the failure.
//!
//! The backend is chosen once at startup by [`StorageMode::resolve`], a pure
//! function of configuration. Nothing else branches on which backend is in
//! use.

mod file;
mod kv;

pub use file::FileBackend;
pub use kv::RemoteKvBackend;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Logical document keys.
pub mod keys {
    pub const AGENT_STATE: &str = "agent-state";
    pub const AGENT_CONFIG: &str = "agent-config";
    pub const DISCOVERY_QUEUE: &str = "discovery-queue";
    pub const PENDING_ENTRIES: &str = "pending-entries";
    pub const REVIEW_QUEUE: &str = "review-queue";
    pub const CITATION_INDEX: &str = "citation-index";
    pub const CHANGELOG: &str = "changelog";
    pub const RESEARCH_QUEUE: &str = "research-queue";
    pub const RESEARCH_SESSIONS: &str = "research-sessions";
    pub const SCHEDULER_STATE: &str = "scheduler-state";
}

/// Backend failures. These never escape [`Storage`]; they are logged there.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock error: {0}")]
    Lock(#[from] crate::lock::LockError),

    #[error("remote KV request failed: {0}")]
    Remote(String),

    #[error("document is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

/// A raw key → JSON document store.
pub trait Backend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Read a document. `Ok(None)` when the key is absent.
    fn read(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Replace the whole document under `key`.
    fn write(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Remove the document. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Whether a document exists under `key`.
    fn contains(&self, key: &str) -> Result<bool, StorageError>;

    /// Read `key`, hand the document to `f` and write back what it returns.
    /// `f` returning `None` leaves the document untouched. An undecodable
    /// document reaches `f` as absent.
    ///
    /// The default has no cross-process exclusion; backends that can hold a
    /// lock across the read and the write override it.
    fn read_modify_write(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>, StorageError>,
    ) -> Result<(), StorageError> {
        let current = read_or_absent(self, key)?;
        if let Some(next) = f(current)? {
            self.write(key, &next)?;
        }
        Ok(())
    }
}

/// `backend.read`, with a corrupt document treated as absent.
pub(crate) fn read_or_absent<B: Backend + ?Sized>(
    backend: &B,
    key: &str,
) -> Result<Option<Value>, StorageError> {
    match backend.read(key) {
        Err(StorageError::Decode(err)) => {
            warn!(key, backend = backend.name(), %err, "document is corrupt, treating as absent");
            Ok(None)
        }
        other => other,
    }
}

/// Keys are restricted to lowercase ASCII, digits and dashes so they map
/// safely onto file names and URL path segments.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    File { data_dir: PathBuf },
    RemoteKv { url: String, token: String },
}

impl StorageMode {
    /// Pick the backend from configuration.
    ///
    /// The remote store is used only when both the URL and the token are
    /// present and non-empty; otherwise documents live under `data_dir`.
    #[must_use]
    pub fn resolve(kv_url: Option<&str>, kv_token: Option<&str>, data_dir: &Path) -> Self {
        match (
            kv_url.filter(|s| !s.trim().is_empty()),
            kv_token.filter(|s| !s.trim().is_empty()),
        ) {
            (Some(url), Some(token)) => Self::RemoteKv {
                url: url.trim_end_matches('/').to_string(),
                token: token.to_string(),
            },
            _ => Self::File {
                data_dir: data_dir.to_path_buf(),
            },
        }
    }

    /// Resolve from `KV_REST_API_URL` / `KV_REST_API_TOKEN`.
    #[must_use]
    pub fn from_env(data_dir: &Path) -> Self {
        let url = std::env::var("KV_REST_API_URL").ok();
        let token = std::env::var("KV_REST_API_TOKEN").ok();
        Self::resolve(url.as_deref(), token.as_deref(), data_dir)
    }

    /// Short label for status output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::RemoteKv { .. } => "remote-kv",
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Backend-agnostic document store handed to every pipeline component.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Storage {
    /// Wrap an existing backend.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Open the backend named by `mode`.
    #[must_use]
    pub fn open(mode: &StorageMode) -> Self {
        debug!(backend = mode.label(), "opening storage");
        match mode {
            StorageMode::File { data_dir } => Self::new(FileBackend::new(data_dir)),
            StorageMode::RemoteKv { url, token } => {
                Self::new(RemoteKvBackend::new(url.clone(), token.clone()))
            }
        }
    }

    /// Name of the active backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Read `key`, returning `default` when absent or unreadable.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.backend.read(key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(key, backend = self.backend.name(), %err, "document has unexpected shape, using default");
                    default
                }
            },
            Ok(None) => default,
            Err(err) => {
                warn!(key, backend = self.backend.name(), %err, "read failed, using default");
                default
            }
        }
    }

    /// Read `key`, falling back to `T::default()`.
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.get(key, T::default())
    }

    /// Replace the document under `key`. Returns `false` on failure.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let encoded = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                error!(key, %err, "failed to encode document");
                return false;
            }
        };
        match self.backend.write(key, &encoded) {
            Ok(()) => true,
            Err(err) => {
                error!(key, backend = self.backend.name(), %err, "write failed");
                false
            }
        }
    }

    /// Remove the document under `key`. Returns `false` on failure.
    pub fn delete(&self, key: &str) -> bool {
        match self.backend.remove(key) {
            Ok(()) => true,
            Err(err) => {
                error!(key, backend = self.backend.name(), %err, "delete failed");
                false
            }
        }
    }

    /// Whether `key` currently holds a document. Errors read as absent.
    pub fn exists(&self, key: &str) -> bool {
        self.backend.contains(key).unwrap_or_else(|err| {
            warn!(key, backend = self.backend.name(), %err, "exists check failed");
            false
        })
    }

    /// Read-modify-write helper for whole documents.
    ///
    /// Not transactional: concurrent writers are excluded by the run state
    /// check, not by this call. See [`Storage::check_and_set`] for the
    /// locked variant.
    pub fn update<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Result<R, crate::LoreError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut doc: T = self.get_or_default(key);
        let out = f(&mut doc);
        if self.set(key, &doc) {
            Ok(out)
        } else {
            Err(crate::LoreError::StorageWrite(key.to_string()))
        }
    }
}

impl Storage {
    /// Locked read-modify-write.
    ///
    /// `f` sees the current document (or the default) and returns `Some` to
    /// commit its changes or `None` to leave the document as it was. On the
    /// file backend no other writer can land between the read and the write.
    pub fn check_and_set<T, R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut T) -> Option<R>,
    ) -> Result<Option<R>, crate::LoreError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut f = Some(f);
        let mut out = None;
        let result = self.backend.read_modify_write(key, &mut |current| {
            let mut doc: T = match current {
                Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
                    warn!(key, %err, "document has unexpected shape, using default");
                    T::default()
                }),
                None => T::default(),
            };
            let Some(apply) = f.take() else {
                return Ok(None);
            };
            match apply(&mut doc) {
                Some(r) => {
                    out = Some(r);
                    Ok(Some(serde_json::to_value(&doc)?))
                }
                None => Ok(None),
            }
        });
        match result {
            Ok(()) => Ok(out),
            Err(err) => {
                error!(key, backend = self.backend.name(), %err, "locked update failed");
                Err(crate::LoreError::StorageWrite(key.to_string()))
            }
        }
    }
}
