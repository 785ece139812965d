/// Error Types
///
/// One error enum per layer of the server. Protocol failures are expressed as
/// JSON-RPC error objects (`RpcError`), while tool-level failures never leave
/// the tool layer as protocol errors: they are folded into `isError` envelopes
/// by the dispatcher.

use serde::Serialize;
use thiserror::Error;

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object (bad id, bad method name).
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Internal JSON-RPC error; also used for malformed params and unknown resources.
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 error object.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RpcError {
    /// JSON-RPC error code (e.g., -32601 for method not found)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

/// Errors raised while loading the tool schema document.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to parse tools JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read tools JSON: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate tool definition: {0}")]
    DuplicateTool(String),
}

/// Generic argument validation failures.
///
/// The `Display` text is what the LLM client sees in the `isError` envelope,
/// so it always names the offending parameter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required parameter: {name} - {description}")]
    MissingParameter { name: String, description: String },

    #[error("parameter {name} must be a string")]
    NotAString { name: String },

    #[error("parameter {name} cannot be empty")]
    EmptyString { name: String },
}

/// Errors returned by tool implementations and their handlers.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("process error: {0}")]
    Process(String),

    #[error("initialization failed: {0}")]
    Initialization(String),
}

/// Startup failures. Any of these ends the process with exit code 1.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to load tool definitions: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to configure logging: {0}")]
    Logging(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
