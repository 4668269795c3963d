//! Per-document diagnostics, as published by the server.
//!
//! `publishDiagnostics` replaces a document's whole list; closing a document
//! or losing the server clears it. The store is shared between the client's
//! reader task and whatever renders the diagnostics.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::hls::protocol::{Diagnostic, Severity};

/// Shared diagnostics state.
#[derive(Default)]
pub struct DiagnosticsStore {
    by_uri: Mutex<BTreeMap<String, Vec<Diagnostic>>>,
}

impl DiagnosticsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the diagnostics of one document. An empty list removes the
    /// entry.
    pub fn publish(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        let mut map = self.by_uri.lock().unwrap();
        if diagnostics.is_empty() {
            map.remove(uri);
        } else {
            map.insert(uri.to_string(), diagnostics);
        }
    }

    /// Drop the diagnostics of one document.
    pub fn clear(&self, uri: &str) {
        self.by_uri.lock().unwrap().remove(uri);
    }

    /// Drop everything (server gone).
    pub fn clear_all(&self) {
        self.by_uri.lock().unwrap().clear();
    }

    /// Snapshot of every document's diagnostics, ordered by URI.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Diagnostic>> {
        self.by_uri.lock().unwrap().clone()
    }

    /// Diagnostics of one document.
    pub fn for_uri(&self, uri: &str) -> Vec<Diagnostic> {
        self.by_uri
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    /// Count of diagnostics at exactly `severity`, across all documents.
    pub fn count(&self, severity: Severity) -> usize {
        self.by_uri
            .lock()
            .unwrap()
            .values()
            .flatten()
            .filter(|d| d.severity() == severity)
            .count()
    }

    /// True if no document has diagnostics.
    pub fn is_empty(&self) -> bool {
        self.by_uri.lock().unwrap().is_empty()
    }
}
