//! Client for the Hypatia Language Server (HLS).
//!
//! The server is an external subprocess speaking JSON-RPC 2.0 over stdio
//! with `Content-Length` framing. This module implements the client side of
//! the subset the extension needs: initialize/shutdown, document lifecycle
//! notifications, published diagnostics, and the two server-to-client
//! requests answered from live configuration.
//!
//! - [`codec`] - wire framing
//! - [`protocol`] - message and payload types
//! - [`diagnostics`] - per-document diagnostics store
//! - [`client`] - one running server process
//! - [`supervisor`] - start/stop policy driven by document visibility

pub mod client;
pub mod codec;
pub mod diagnostics;
pub mod protocol;
pub mod supervisor;

pub use client::{HlsClient, ServerConfig};
pub use diagnostics::DiagnosticsStore;
pub use supervisor::HlsSupervisor;

/// Configuration keys for the server subprocess.
pub mod keys {
    /// Executable path of the HLS binary. The client stays off while unset.
    pub const PATH: &str = "hypatia.server.path";
    /// Extra arguments passed to the server (array of strings).
    pub const ARGS: &str = "hypatia.server.args";
    /// Client-to-server request timeout (milliseconds).
    pub const REQUEST_TIMEOUT_MS: &str = "hypatia.server.requestTimeoutMs";
    /// Delay before the server is stopped once no Hypatia document remains
    /// visible (milliseconds).
    pub const SHUTDOWN_DEBOUNCE_MS: &str = "hypatia.server.shutdownDebounceMs";
}
