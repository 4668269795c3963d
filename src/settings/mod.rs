//! Hierarchical configuration access.
//!
//! The host editor keeps configuration in three tiers, most specific last:
//!
//! - **Global** - user-level settings
//! - **Workspace** - settings of the open workspace
//! - **WorkspaceFolder** - settings of one folder inside a multi-root workspace
//!
//! [`ConfigStore`] is the host-side storage trait (per-tier raw values plus
//! synchronous change notification). [`SettingsAccessor`] layers the merge,
//! target-picking, and equality-checked writes on top of it. The accessor is
//! the only path the reconciler uses to touch configuration, so the
//! skip-if-unchanged rule in [`SettingsAccessor::write`] is load-bearing:
//! writes happen inside handlers for the very keys being written, and a no-op
//! write must not fire another change event.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Configuration tier a value is defined or written at.
///
/// Ordering is specificity: `Global < Workspace < WorkspaceFolder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigTier {
    /// User-level settings, always available.
    Global,
    /// Settings of the open workspace.
    Workspace,
    /// Settings of a single workspace folder.
    WorkspaceFolder,
}

impl ConfigTier {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Workspace => "workspace",
            Self::WorkspaceFolder => "workspace-folder",
        }
    }
}

impl fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolution context for folder-scoped reads and writes.
///
/// `folder` names a workspace folder (by URI); `None` means no folder
/// context, in which case the folder tier is invisible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigScope {
    /// Workspace folder URI this access is scoped to, if any.
    pub folder: Option<String>,
}

impl ConfigScope {
    /// Scope for a concrete workspace folder.
    pub fn folder(uri: impl Into<String>) -> Self {
        Self {
            folder: Some(uri.into()),
        }
    }
}

/// Raw per-tier values for one key, as reported by the host store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inspection {
    /// Value defined at the global tier, if any.
    pub global_value: Option<Value>,
    /// Value defined at the workspace tier, if any.
    pub workspace_value: Option<Value>,
    /// Value defined at the folder tier for the inspected scope, if any.
    pub workspace_folder_value: Option<Value>,
}

impl Inspection {
    /// True if the key is undefined at every tier.
    pub fn is_empty(&self) -> bool {
        self.global_value.is_none()
            && self.workspace_value.is_none()
            && self.workspace_folder_value.is_none()
    }
}

/// Listener invoked with the key name after every effective write.
pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Host-side hierarchical configuration storage.
///
/// Implementations hold raw values per tier and dispatch change listeners
/// synchronously from inside [`ConfigStore::write_raw`], mirroring how the
/// host fires configuration-change events during a write.
pub trait ConfigStore: Send + Sync {
    /// Report the raw value of `key` at each tier. The folder tier is only
    /// populated when `scope` names a folder.
    fn inspect(&self, key: &str, scope: Option<&ConfigScope>) -> Inspection;

    /// Set (`Some`) or remove (`None`) the raw value of `key` at `tier`.
    ///
    /// Fails if the tier cannot be written (no open workspace, host
    /// rejection). Change listeners fire before this returns.
    fn write_raw(
        &self,
        key: &str,
        value: Option<Value>,
        tier: ConfigTier,
        scope: Option<&ConfigScope>,
    ) -> Result<()>;

    /// Register a change listener. Listeners are never removed.
    fn subscribe(&self, listener: ChangeListener);
}

/// Merged, equality-checked view over a [`ConfigStore`].
#[derive(Clone)]
pub struct SettingsAccessor {
    store: Arc<dyn ConfigStore>,
}

impl SettingsAccessor {
    /// Create an accessor over the given host store.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Effective merged value: folder over workspace over global.
    pub fn read(&self, key: &str, scope: Option<&ConfigScope>) -> Option<Value> {
        let insp = self.store.inspect(key, scope);
        insp.workspace_folder_value
            .or(insp.workspace_value)
            .or(insp.global_value)
    }

    /// Raw per-tier values for `key`.
    pub fn inspect(&self, key: &str, scope: Option<&ConfigScope>) -> Inspection {
        self.store.inspect(key, scope)
    }

    /// Most specific tier that currently defines `key`; `Global` if the key
    /// is undefined everywhere.
    pub fn pick_target(&self, key: &str, scope: Option<&ConfigScope>) -> ConfigTier {
        let insp = self.store.inspect(key, scope);
        if insp.workspace_folder_value.is_some() {
            ConfigTier::WorkspaceFolder
        } else if insp.workspace_value.is_some() {
            ConfigTier::Workspace
        } else {
            ConfigTier::Global
        }
    }

    /// Write `value` at `target` (or remove the key when `value` is `None`).
    ///
    /// The write is skipped when the new value is structurally equal to the
    /// current raw value at the resolved tier. A `WorkspaceFolder` target
    /// with no folder in scope degrades to `Workspace`. Returns the tier the
    /// value was resolved to, whether or not a write happened.
    pub fn write(
        &self,
        key: &str,
        value: Option<Value>,
        target: ConfigTier,
        scope: Option<&ConfigScope>,
    ) -> Result<ConfigTier> {
        let tier = match target {
            ConfigTier::WorkspaceFolder if scope.and_then(|s| s.folder.as_ref()).is_none() => {
                ConfigTier::Workspace
            }
            other => other,
        };

        let insp = self.store.inspect(key, scope);
        let current = match tier {
            ConfigTier::Global => &insp.global_value,
            ConfigTier::Workspace => &insp.workspace_value,
            ConfigTier::WorkspaceFolder => &insp.workspace_folder_value,
        };
        if *current == value {
            debug!(key, %tier, "configuration write skipped, value unchanged");
            return Ok(tier);
        }

        self.store.write_raw(key, value, tier, scope)?;
        Ok(tier)
    }
}

/// In-memory [`ConfigStore`] used by tests and embedders without a host.
///
/// Supports failure injection: a tier added via [`Self::reject_tier`] rejects
/// all writes, and workspace-tier writes fail while no workspace is open
/// ([`Self::set_workspace_open`]).
#[derive(Clone)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<MemoryConfigInner>>,
}

#[derive(Default)]
struct MemoryConfigInner {
    global: HashMap<String, Value>,
    workspace: HashMap<String, Value>,
    folders: HashMap<String, HashMap<String, Value>>,
    listeners: Vec<ChangeListener>,
    rejected: HashSet<ConfigTier>,
    workspace_open: bool,
}

impl MemoryConfigStore {
    /// Create an empty store with an open workspace.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryConfigInner {
                workspace_open: true,
                ..Default::default()
            })),
        }
    }

    /// Seed a value without firing change listeners (test setup).
    pub fn seed(&self, key: &str, value: Value, tier: ConfigTier, folder: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        match tier {
            ConfigTier::Global => {
                inner.global.insert(key.to_string(), value);
            }
            ConfigTier::Workspace => {
                inner.workspace.insert(key.to_string(), value);
            }
            ConfigTier::WorkspaceFolder => {
                let folder = folder.expect("folder tier seed needs a folder");
                inner
                    .folders
                    .entry(folder.to_string())
                    .or_default()
                    .insert(key.to_string(), value);
            }
        }
    }

    /// Make all writes at `tier` fail with [`Error::WriteRejected`].
    pub fn reject_tier(&self, tier: ConfigTier) {
        self.inner.lock().unwrap().rejected.insert(tier);
    }

    /// Stop rejecting writes at `tier`.
    pub fn accept_tier(&self, tier: ConfigTier) {
        self.inner.lock().unwrap().rejected.remove(&tier);
    }

    /// Toggle whether a workspace is open; workspace-tier writes fail while
    /// closed.
    pub fn set_workspace_open(&self, open: bool) {
        self.inner.lock().unwrap().workspace_open = open;
    }

    fn notify(&self, key: &str) {
        // Clone the listener list out so callbacks can re-enter the store.
        let listeners: Vec<ChangeListener> =
            self.inner.lock().unwrap().listeners.iter().cloned().collect();
        for listener in listeners {
            listener(key);
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn inspect(&self, key: &str, scope: Option<&ConfigScope>) -> Inspection {
        let inner = self.inner.lock().unwrap();
        let folder_value = scope
            .and_then(|s| s.folder.as_ref())
            .and_then(|f| inner.folders.get(f))
            .and_then(|m| m.get(key))
            .cloned();
        Inspection {
            global_value: inner.global.get(key).cloned(),
            workspace_value: inner.workspace.get(key).cloned(),
            workspace_folder_value: folder_value,
        }
    }

    fn write_raw(
        &self,
        key: &str,
        value: Option<Value>,
        tier: ConfigTier,
        scope: Option<&ConfigScope>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.rejected.contains(&tier) {
                return Err(Error::WriteRejected(format!(
                    "host rejected write of {key} at {tier}"
                )));
            }
            match tier {
                ConfigTier::Global => match value {
                    Some(v) => {
                        inner.global.insert(key.to_string(), v);
                    }
                    None => {
                        inner.global.remove(key);
                    }
                },
                ConfigTier::Workspace => {
                    if !inner.workspace_open {
                        return Err(Error::WriteRejected(format!(
                            "cannot write {key} at workspace tier: no workspace open"
                        )));
                    }
                    match value {
                        Some(v) => {
                            inner.workspace.insert(key.to_string(), v);
                        }
                        None => {
                            inner.workspace.remove(key);
                        }
                    }
                }
                ConfigTier::WorkspaceFolder => {
                    let folder = scope.and_then(|s| s.folder.clone()).ok_or_else(|| {
                        Error::WriteRejected(format!(
                            "cannot write {key} at folder tier: no folder in scope"
                        ))
                    })?;
                    let map = inner.folders.entry(folder).or_default();
                    match value {
                        Some(v) => {
                            map.insert(key.to_string(), v);
                        }
                        None => {
                            map.remove(key);
                        }
                    }
                }
            }
        }
        self.notify(key);
        Ok(())
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.inner.lock().unwrap().listeners.push(listener);
    }
}
