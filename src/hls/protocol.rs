//! JSON-RPC 2.0 and LSP payload types for the HLS subset.
//!
//! Incoming traffic is decoded in two steps: the frame body into a
//! [`serde_json::Value`], then into [`Incoming`] to classify it. Requests we
//! send are built with [`request`]/[`notification`]; payload structs cover
//! only the fields this client reads.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol version tag on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Methods this client sends or answers.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_SAVE: &str = "textDocument/didSave";
    pub const DID_CLOSE: &str = "textDocument/didClose";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
    pub const WORKSPACE_CONFIGURATION: &str = "workspace/configuration";
    pub const WORKSPACE_FOLDERS: &str = "workspace/workspaceFolders";
    pub const LOG_MESSAGE: &str = "window/logMessage";
    pub const SHOW_MESSAGE: &str = "window/showMessage";
}

/// JSON-RPC error code for an unhandled server-to-client method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// One decoded incoming message.
///
/// Untagged: a request carries `id` and `method`, a response `id` without
/// `method`, a notification `method` without `id`. Variant order encodes
/// that discrimination.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Request {
        id: Value,
        method: String,
        #[serde(default)]
        params: Option<Value>,
    },
    Response {
        id: Value,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ResponseError>,
    },
    Notification {
        method: String,
        #[serde(default)]
        params: Option<Value>,
    },
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Build an outgoing request.
pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params})
}

/// Build an outgoing notification.
pub fn notification(method: &str, params: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "method": method, "params": params})
}

/// Build a response to a server-to-client request.
pub fn response(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result})
}

/// Build an error response to a server-to-client request.
pub fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": {"code": code, "message": message}})
}

/// One workspace folder advertised to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFolder {
    pub uri: String,
    pub name: String,
}

/// Diagnostic severity, in display terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    /// Map the LSP numeric severity (1-4). Absent or out-of-range values
    /// read as errors, per the protocol's guidance.
    pub fn from_lsp(code: Option<i64>) -> Self {
        match code {
            Some(2) => Self::Warning,
            Some(3) => Self::Information,
            Some(4) => Self::Hint,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "information",
            Self::Hint => "hint",
        };
        write!(f, "{name}")
    }
}

/// Zero-based position in a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Half-open range in a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// One diagnostic as the server reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Diagnostic {
    #[serde(default)]
    pub range: Range,
    #[serde(default)]
    severity: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

impl Diagnostic {
    /// Display severity of this diagnostic.
    pub fn severity(&self) -> Severity {
        Severity::from_lsp(self.severity)
    }
}

/// Params of `textDocument/publishDiagnostics`.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Params of `window/logMessage` and `window/showMessage`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageParams {
    #[serde(rename = "type", default)]
    pub kind: Option<i64>,
    pub message: String,
}

/// Params of `workspace/configuration`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationParams {
    #[serde(default)]
    pub items: Vec<ConfigurationItem>,
}

/// One requested configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationItem {
    #[serde(default)]
    pub section: Option<String>,
}

/// Params for `initialize`.
pub fn initialize_params(root_uri: Option<&str>, folders: &[WorkspaceFolder]) -> Value {
    json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "publishDiagnostics": {"relatedInformation": false},
                "synchronization": {"didSave": true}
            },
            "workspace": {
                "configuration": true,
                "workspaceFolders": true
            }
        },
        "workspaceFolders": folders,
    })
}

/// Params for `textDocument/didOpen`.
pub fn did_open_params(uri: &str, language_id: &str, version: i64, text: &str) -> Value {
    json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text,
        }
    })
}

/// Params for `textDocument/didChange`, full-text sync.
pub fn did_change_params(uri: &str, version: i64, text: &str) -> Value {
    json!({
        "textDocument": {"uri": uri, "version": version},
        "contentChanges": [{"text": text}],
    })
}

/// Params for `textDocument/didSave`.
pub fn did_save_params(uri: &str) -> Value {
    json!({"textDocument": {"uri": uri}})
}

/// Params for `textDocument/didClose`.
pub fn did_close_params(uri: &str) -> Value {
    json!({"textDocument": {"uri": uri}})
}
