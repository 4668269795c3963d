//! Server lifecycle tied to document activity.
//!
//! The supervisor starts the server the first time a Hypatia document shows
//! up, forwards document sync notifications while it runs, and schedules a
//! debounced stop once the last tracked document closes. A document arriving
//! during the debounce window cancels the stop; a failed launch is logged
//! and retried on the next qualifying document.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::hls::client::{HlsClient, ServerConfig};
use crate::hls::diagnostics::DiagnosticsStore;
use crate::hls::keys;
use crate::hls::protocol::WorkspaceFolder;
use crate::host::LANGUAGE_ID;
use crate::settings::SettingsAccessor;

/// Default idle window before the server is stopped.
pub const DEFAULT_SHUTDOWN_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct SupervisorState {
    client: Option<HlsClient>,
    /// Tracked documents, uri to current sync version.
    open_docs: HashMap<String, i64>,
    /// Bumped on every start or stop decision; a scheduled stop only fires
    /// if its generation is still current.
    stop_generation: u64,
}

struct Shared {
    accessor: SettingsAccessor,
    root_uri: Option<String>,
    folders: Vec<WorkspaceFolder>,
    diagnostics: Arc<DiagnosticsStore>,
    state: Mutex<SupervisorState>,
}

/// Starts, feeds, and stops the language server as documents come and go.
#[derive(Clone)]
pub struct HlsSupervisor {
    shared: Arc<Shared>,
}

impl HlsSupervisor {
    pub fn new(
        accessor: SettingsAccessor,
        root_uri: Option<String>,
        folders: Vec<WorkspaceFolder>,
        diagnostics: Arc<DiagnosticsStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                accessor,
                root_uri,
                folders,
                diagnostics,
                state: Mutex::new(SupervisorState::default()),
            }),
        }
    }

    /// Shared diagnostics store the running server publishes into.
    pub fn diagnostics(&self) -> Arc<DiagnosticsStore> {
        self.shared.diagnostics.clone()
    }

    /// A document became visible. Starts the server on the first Hypatia
    /// document and opens the document with it.
    pub async fn document_visible(&self, uri: &str, language_id: &str, text: &str) {
        if language_id != LANGUAGE_ID {
            return;
        }
        let mut state = self.shared.state.lock().await;
        // Any activity cancels a pending idle stop.
        state.stop_generation += 1;

        if let Some(client) = state.client.as_mut() {
            if !client.is_alive() {
                warn!("language server died, discarding the dead connection");
                state.client = None;
                state.open_docs.clear();
                self.shared.diagnostics.clear_all();
            }
        }

        if state.client.is_none() {
            let Some(config) = ServerConfig::load(&self.shared.accessor) else {
                debug!("no language server path configured");
                return;
            };
            match self.launch(&config).await {
                Ok(client) => state.client = Some(client),
                Err(e) => {
                    warn!(error = %e, path = %config.path, "language server launch failed");
                    return;
                }
            }
        }

        if !state.open_docs.contains_key(uri) {
            state.open_docs.insert(uri.to_string(), 1);
            if let Some(client) = state.client.as_ref() {
                if let Err(e) = client.did_open(uri, language_id, 1, text) {
                    warn!(error = %e, uri, "didOpen failed");
                }
            }
        }
    }

    /// A tracked document's text changed.
    pub async fn document_changed(&self, uri: &str, text: &str) {
        let mut state = self.shared.state.lock().await;
        let Some(version) = state.open_docs.get_mut(uri) else {
            return;
        };
        *version += 1;
        let version = *version;
        if let Some(client) = state.client.as_ref() {
            if let Err(e) = client.did_change(uri, version, text) {
                warn!(error = %e, uri, "didChange failed");
            }
        }
    }

    /// A tracked document was saved.
    pub async fn document_saved(&self, uri: &str) {
        let state = self.shared.state.lock().await;
        if !state.open_docs.contains_key(uri) {
            return;
        }
        if let Some(client) = state.client.as_ref() {
            if let Err(e) = client.did_save(uri) {
                warn!(error = %e, uri, "didSave failed");
            }
        }
    }

    /// A document closed. When the last tracked document goes away the
    /// server is stopped after the configured idle window.
    pub async fn document_closed(&self, uri: &str) {
        let mut state = self.shared.state.lock().await;
        if state.open_docs.remove(uri).is_none() {
            return;
        }
        if let Some(client) = state.client.as_ref() {
            if let Err(e) = client.did_close(uri) {
                warn!(error = %e, uri, "didClose failed");
            }
        }
        if state.open_docs.is_empty() && state.client.is_some() {
            state.stop_generation += 1;
            let generation = state.stop_generation;
            let debounce = self.shutdown_debounce();
            let this = self.clone();
            debug!(debounce_ms = debounce.as_millis() as u64, "scheduling idle stop");
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                this.maybe_stop(generation).await;
            });
        }
    }

    /// Stop the server immediately, ignoring any debounce.
    pub async fn stop_now(&self) {
        let client = {
            let mut state = self.shared.state.lock().await;
            state.stop_generation += 1;
            state.open_docs.clear();
            state.client.take()
        };
        self.stop_client(client).await;
    }

    /// True while a live subprocess is attached.
    pub async fn is_running(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        state.client.as_mut().is_some_and(|c| c.is_alive())
    }

    async fn launch(&self, config: &ServerConfig) -> crate::Result<HlsClient> {
        let client = HlsClient::spawn(
            config,
            self.shared.accessor.clone(),
            self.shared.root_uri.clone(),
            self.shared.folders.clone(),
            self.shared.diagnostics.clone(),
        )?;
        client.initialize().await?;
        info!(path = %config.path, "language server ready");
        Ok(client)
    }

    async fn maybe_stop(&self, generation: u64) {
        let client = {
            let mut state = self.shared.state.lock().await;
            if state.stop_generation != generation || !state.open_docs.is_empty() {
                return;
            }
            state.client.take()
        };
        if client.is_some() {
            info!("stopping idle language server");
        }
        self.stop_client(client).await;
    }

    async fn stop_client(&self, client: Option<HlsClient>) {
        if let Some(client) = client {
            if let Err(e) = client.shutdown().await {
                warn!(error = %e, "language server shutdown failed");
            }
            self.shared.diagnostics.clear_all();
        }
    }

    fn shutdown_debounce(&self) -> Duration {
        self.shared
            .accessor
            .read(keys::SHUTDOWN_DEBOUNCE_MS, None)
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SHUTDOWN_DEBOUNCE)
    }
}
