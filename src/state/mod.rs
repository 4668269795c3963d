//! Persistent automation state.
//!
//! The reconciler has to remember, across editor restarts, whether a style
//! concern is currently automated, what the user's prior value was, and which
//! configuration tier it wrote. [`StateStore`] is the key/value backend trait;
//! [`MemoryStateStore`] backs tests and [`FileStateStore`] persists a single
//! JSON object under `~/.local/share/hypatia/<workspace-hash>/state.json`.
//!
//! [`ConcernState`] is the per-concern record with its save/load contract.
//! There are no transactions: callers persist the pre-write capture before
//! the configuration write and roll back to the previous record if the write
//! is rejected, so a crash at any point leaves a recoverable state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::settings::ConfigTier;
use crate::theme::Variant;
use crate::{Error, Result};

/// Extension-lifetime persistent key/value storage.
pub trait StateStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store (`Some`) or remove (`None`) the value under `key`.
    fn set(&self, key: &str, value: Option<Value>) -> Result<()>;
}

/// Volatile [`StateStore`] for tests and host-less embedding.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    map: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    /// True if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
        let mut map = self.map.lock().unwrap();
        match value {
            Some(v) => {
                map.insert(key.to_string(), v);
            }
            None => {
                map.remove(key);
            }
        }
        Ok(())
    }
}

/// File-backed [`StateStore`]: one JSON object, written atomically.
pub struct FileStateStore {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, Value>>,
}

impl FileStateStore {
    /// Open (or create) the state file for a workspace, placed in the
    /// per-workspace data directory.
    pub fn open(workspace_path: &Path) -> Result<Self> {
        let dir = state_dir(workspace_path)?;
        fs::create_dir_all(&dir)?;
        Self::open_at(dir.join("state.json"))
    }

    /// Open (or create) a state file at an explicit path. Used by tests to
    /// inject an isolated location.
    pub fn open_at(path: PathBuf) -> Result<Self> {
        let cache = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "state file unreadable, starting empty");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    fn flush(&self, map: &BTreeMap<String, Value>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
        let mut map = self.cache.lock().unwrap();
        match value {
            Some(v) => {
                map.insert(key.to_string(), v);
            }
            None => {
                map.remove(key);
            }
        }
        self.flush(&map)
    }
}

/// Get the state directory for a workspace.
///
/// Uses a hash of the workspace path to create a unique directory under
/// `~/.local/share/hypatia/`.
pub fn state_dir(workspace_path: &Path) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;

    let canonical = workspace_path
        .canonicalize()
        .map_err(|e| Error::Other(format!("Could not canonicalize workspace path: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());

    Ok(data_dir.join("hypatia").join(&hash_hex[..12]))
}

/// One automated style facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    /// Whole workbench theme.
    Theme,
    /// Injected token-color overlay.
    Tokens,
    /// Semantic-highlighting flag.
    Semantic,
}

impl Concern {
    /// State-store key this concern's record lives under.
    pub fn state_key(&self) -> &'static str {
        match self {
            Self::Theme => "hypatia.style.theme",
            Self::Tokens => "hypatia.style.tokens",
            Self::Semantic => "hypatia.style.semantic",
        }
    }

    /// Get the concern name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Tokens => "tokens",
            Self::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for Concern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent record for one concern.
///
/// While `applied` is true this automation owns the live value and
/// `saved_value`/`target` hold everything needed to hand it back.
/// `saved_value` distinguishes three cases: `None` means nothing was ever
/// captured, `Some(Value::Null)` means the key was captured as *absent* (a
/// restore removes it), and any other `Some` is the literal prior value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcernState {
    /// Does this concern's automation currently own the live value.
    #[serde(default)]
    pub applied: bool,
    /// Prior value to restore, captured before the first automated write of
    /// the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_value: Option<Value>,
    /// Tier the automated value was written at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ConfigTier>,
    /// Theme label this automation last applied (theme concern).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_label: Option<String>,
    /// Variant whose overlay rules are live (tokens concern).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_variant: Option<Variant>,
    /// Value this automation last wrote (semantic concern).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_desired: Option<Value>,
}

impl ConcernState {
    /// Load the record for `concern`, defaulting to an untouched record when
    /// absent or unparsable.
    pub fn load(store: &dyn StateStore, concern: Concern) -> Self {
        store
            .get(concern.state_key())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Persist this record for `concern`.
    pub fn save(&self, store: &dyn StateStore, concern: Concern) -> Result<()> {
        store.set(concern.state_key(), Some(serde_json::to_value(self)?))
    }

    /// Remove the record for `concern` entirely.
    pub fn clear(store: &dyn StateStore, concern: Concern) -> Result<()> {
        store.set(concern.state_key(), None)
    }
}
