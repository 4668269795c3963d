//! Hypatia editor support - style automation and language-server client.
//!
//! This library is the editor-agnostic core of the Hypatia editor extension.
//! The host editor is modeled as a set of injectable traits (configuration
//! store, persistent state store, workbench view), so the same logic runs
//! against a real host binding or against the in-memory implementations used
//! by the test suite.
//!
//! The two halves:
//!
//! - [`style`] - the style-automation reconciler. Watches which document is
//!   active, and toggles the workbench theme, a token-color overlay, and the
//!   semantic-highlighting flag while a Hypatia document is current, saving
//!   and restoring the user's own settings exactly once per session.
//! - [`hls`] - a client for the Hypatia Language Server: subprocess spawn,
//!   JSON-RPC framing over stdio, document lifecycle forwarding, diagnostics.

pub mod hls;
pub mod host;
pub mod overlay;
pub mod settings;
pub mod state;
pub mod style;
pub mod theme;

/// Library-level error type for editor-support operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration write rejected: {0}")]
    WriteRejected(String),

    #[error("Theme asset unreadable: {0}")]
    AssetUnreadable(String),

    #[error("Language server exited: {0}")]
    ServerExited(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for editor-support operations.
pub type Result<T> = std::result::Result<T, Error>;
