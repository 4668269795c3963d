//! Common test utilities for hypatia-editor integration tests.
//!
//! Provides `TestEnv`: an in-memory host (configuration, workbench, state)
//! wired to a spawned [`StyleAutomation`] the way the real extension host
//! wires them, including the feedback path where every configuration write
//! raises a change event back into the automation.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use serde_json::Value;
use tokio::time::{Duration, sleep};

use hypatia_editor::host::{DocumentInfo, MemoryWorkbench};
use hypatia_editor::settings::{ConfigStore, ConfigTier, MemoryConfigStore, SettingsAccessor};
use hypatia_editor::state::MemoryStateStore;
use hypatia_editor::style::{StyleAutomation, keys};
use hypatia_editor::theme::{ThemeAssets, ThemeKind};

/// Route test logs through tracing, honoring `RUST_LOG`.
///
/// Run with e.g. `RUST_LOG=hypatia_editor=debug` to see pass decisions.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Bundled theme files shipped with the extension.
pub fn bundled_assets() -> ThemeAssets {
    ThemeAssets::new(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/themes"))
}

/// An isolated host with the style automation running against it.
pub struct TestEnv {
    pub store: MemoryConfigStore,
    pub accessor: SettingsAccessor,
    pub workbench: Arc<MemoryWorkbench>,
    pub state: Arc<MemoryStateStore>,
    pub automation: StyleAutomation,
    writes: Arc<AtomicUsize>,
}

impl TestEnv {
    /// Host starts on a foreign dark theme with no Hypatia document open.
    pub fn new() -> Self {
        Self::with_theme("Default Dark+", ThemeKind::Dark)
    }

    pub fn with_theme(label: &str, kind: ThemeKind) -> Self {
        init_tracing();
        let store = MemoryConfigStore::new();
        let workbench = Arc::new(MemoryWorkbench::new(label, kind));
        workbench.attach_to(&store);

        let writes = Arc::new(AtomicUsize::new(0));
        let counter = writes.clone();
        store.subscribe(Arc::new(move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let accessor = SettingsAccessor::new(Arc::new(store.clone()));
        let state = Arc::new(MemoryStateStore::new());
        let automation = StyleAutomation::spawn(
            accessor.clone(),
            state.clone(),
            workbench.clone(),
            bundled_assets(),
        );

        // The host raises a change event for every settings write, our own
        // included; the automation has to filter the echoes itself.
        let feedback = automation.clone();
        store.subscribe(Arc::new(move |key| feedback.notify_config_change(key)));

        Self {
            store,
            accessor,
            workbench,
            state,
            automation,
            writes,
        }
    }

    /// Focus a Hypatia document and raise the editor event.
    pub fn focus_hypatia(&self, uri: &str) {
        self.workbench.focus(DocumentInfo::hypatia(uri));
        self.automation.notify_editor_change();
    }

    /// Focus a non-Hypatia document and raise the editor event.
    pub fn focus_other(&self, uri: &str, language_id: &str) {
        self.workbench.focus(DocumentInfo::new(uri, language_id));
        self.automation.notify_editor_change();
    }

    /// Close an editor and raise the editor event.
    pub fn close(&self, uri: &str) {
        self.workbench.close(uri);
        self.automation.notify_editor_change();
    }

    /// Simulate the user picking a theme: the workbench flips and both host
    /// events (theme change, settings change) fire.
    pub fn user_picks_theme(&self, label: &str, kind: ThemeKind) {
        self.workbench.set_active_theme(label, kind);
        self.store.seed(
            keys::COLOR_THEME,
            Value::String(label.into()),
            ConfigTier::Global,
            None,
        );
        self.automation.notify_theme_change();
    }

    /// Wait until every queued trigger has been reconciled.
    pub async fn settle(&self) {
        self.automation.flush().await;
    }

    /// Wait long enough for a pending leave debounce to fire and drain it.
    pub async fn settle_after(&self, debounce: Duration) {
        sleep(debounce + Duration::from_millis(50)).await;
        self.automation.flush().await;
    }

    pub fn theme_label(&self) -> Option<String> {
        self.accessor
            .read(keys::COLOR_THEME, None)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn token_customizations(&self) -> Option<Value> {
        self.accessor.read(keys::TOKEN_CUSTOMIZATIONS, None)
    }

    pub fn semantic_enabled(&self) -> Option<Value> {
        self.accessor.read(keys::SEMANTIC_ENABLED, None)
    }

    /// Settings writes observed so far (all tiers, all keys).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn seed_global(&self, key: &str, value: Value) {
        self.store.seed(key, value, ConfigTier::Global, None);
    }
}
