//! Host editor abstraction.
//!
//! The reconciler never talks to an editor API directly; it reads a
//! [`Workbench`] snapshot (active document, visible documents, active theme)
//! and is driven by trigger notifications forwarded from the host's event
//! callbacks. [`MemoryWorkbench`] is the in-process implementation used by
//! tests: it couples itself to a [`MemoryConfigStore`] so that writes to the
//! `workbench.colorTheme` key change the reported theme, the same way a real
//! host applies that setting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::settings::{ConfigStore, MemoryConfigStore};
use crate::style::keys;
use crate::theme::{ThemeKind, variant_for_label};

/// Language identifier Hypatia documents carry.
pub const LANGUAGE_ID: &str = "hypatia";

/// One open document as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Document URI.
    pub uri: String,
    /// Host language identifier.
    pub language_id: String,
}

impl DocumentInfo {
    /// Build a document record.
    pub fn new(uri: impl Into<String>, language_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
        }
    }

    /// Shorthand for a Hypatia document.
    pub fn hypatia(uri: impl Into<String>) -> Self {
        Self::new(uri, LANGUAGE_ID)
    }

    /// True if this document is in the Hypatia language.
    pub fn is_hypatia(&self) -> bool {
        self.language_id == LANGUAGE_ID
    }
}

/// The host's active color theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeInfo {
    /// Workbench theme label.
    pub label: String,
    /// Light/dark/high-contrast kind.
    pub kind: ThemeKind,
}

/// Read-only view of the live editor state.
pub trait Workbench: Send + Sync {
    /// The focused document, if any editor has focus.
    fn active_document(&self) -> Option<DocumentInfo>;

    /// Every document currently visible in some editor, focused or not.
    fn visible_documents(&self) -> Vec<DocumentInfo>;

    /// The active color theme.
    fn active_theme(&self) -> ThemeInfo;
}

/// In-memory [`Workbench`] for tests and host-less embedding.
#[derive(Clone)]
pub struct MemoryWorkbench {
    inner: Arc<Mutex<WorkbenchState>>,
}

struct WorkbenchState {
    active: Option<DocumentInfo>,
    visible: Vec<DocumentInfo>,
    theme: ThemeInfo,
    /// Kind to report for labels the bundled mapping does not know.
    foreign_kinds: HashMap<String, ThemeKind>,
}

impl MemoryWorkbench {
    /// Create a workbench with no documents and the given starting theme.
    pub fn new(theme_label: impl Into<String>, kind: ThemeKind) -> Self {
        let label = theme_label.into();
        let mut foreign_kinds = HashMap::new();
        foreign_kinds.insert(label.clone(), kind);
        Self {
            inner: Arc::new(Mutex::new(WorkbenchState {
                active: None,
                visible: Vec::new(),
                theme: ThemeInfo { label, kind },
                foreign_kinds,
            })),
        }
    }

    /// Couple this workbench to `store`: whenever the `workbench.colorTheme`
    /// key changes, the reported theme follows it. Bundled labels map to
    /// their own kind; foreign labels fall back to the last kind registered
    /// for them (dark otherwise).
    pub fn attach_to(&self, store: &MemoryConfigStore) {
        let workbench = self.clone();
        let reader = store.clone();
        store.subscribe(Arc::new(move |key| {
            if key != keys::COLOR_THEME {
                return;
            }
            let insp = reader.inspect(keys::COLOR_THEME, None);
            let label = insp
                .workspace_value
                .or(insp.global_value)
                .and_then(|v| v.as_str().map(str::to_string));
            if let Some(label) = label {
                workbench.apply_theme_label(&label);
            }
        }));
    }

    fn apply_theme_label(&self, label: &str) {
        let mut state = self.inner.lock().unwrap();
        let kind = match variant_for_label(label) {
            Some(crate::theme::Variant::Light) => ThemeKind::Light,
            Some(crate::theme::Variant::Dark) => ThemeKind::Dark,
            None => state
                .foreign_kinds
                .get(label)
                .copied()
                .unwrap_or(ThemeKind::Dark),
        };
        state.theme = ThemeInfo {
            label: label.to_string(),
            kind,
        };
    }

    /// Set the theme directly, as an external (user-driven) change would.
    pub fn set_active_theme(&self, label: impl Into<String>, kind: ThemeKind) {
        let label = label.into();
        let mut state = self.inner.lock().unwrap();
        state.foreign_kinds.insert(label.clone(), kind);
        state.theme = ThemeInfo { label, kind };
    }

    /// Focus a document, making it active and visible.
    pub fn focus(&self, doc: DocumentInfo) {
        let mut state = self.inner.lock().unwrap();
        if !state.visible.iter().any(|d| d.uri == doc.uri) {
            state.visible.push(doc.clone());
        }
        state.active = Some(doc);
    }

    /// Drop focus without closing any editor.
    pub fn blur(&self) {
        self.inner.lock().unwrap().active = None;
    }

    /// Close a document, removing it from the visible set (and from focus
    /// if it was active).
    pub fn close(&self, uri: &str) {
        let mut state = self.inner.lock().unwrap();
        state.visible.retain(|d| d.uri != uri);
        if state.active.as_ref().is_some_and(|d| d.uri == uri) {
            state.active = None;
        }
    }
}

impl Workbench for MemoryWorkbench {
    fn active_document(&self) -> Option<DocumentInfo> {
        self.inner.lock().unwrap().active.clone()
    }

    fn visible_documents(&self) -> Vec<DocumentInfo> {
        self.inner.lock().unwrap().visible.clone()
    }

    fn active_theme(&self) -> ThemeInfo {
        self.inner.lock().unwrap().theme.clone()
    }
}
