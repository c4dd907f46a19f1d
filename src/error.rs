//! Error types for the MCP relay server.

use thiserror::Error;

use crate::mcp::protocol::error_codes;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the relay.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Envelope Errors =====
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method [{0}] not found")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    // ===== Domain Errors =====
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid completion reference type: {0}")]
    InvalidCompletionRef(String),

    // ===== Transport Errors =====
    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Unsupported protocol version: {requested}. Supported versions: {supported}")]
    UnsupportedProtocolVersion {
        requested: String,
        supported: String,
    },

    #[error("{0}")]
    SessionRejected(String),

    // ===== I/O / Internal =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// JSON-RPC error code carried by the response envelope for this error.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) | Self::SessionRejected(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::ResourceNotFound(_) => error_codes::RESOURCE_NOT_FOUND,
            Self::ShuttingDown | Self::UnsupportedProtocolVersion { .. } => {
                error_codes::SERVER_ERROR
            }
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ToolNotFound("echo".to_string());
        assert_eq!(err.to_string(), "Tool not found: echo");

        let err = Error::ResourceNotFound("file://x".to_string());
        assert_eq!(err.to_string(), "Resource not found: file://x");

        let err = Error::MethodNotFound("tools/frobnicate".to_string());
        assert_eq!(err.to_string(), "Method [tools/frobnicate] not found");

        let err = Error::InvalidLogLevel("verbose".to_string());
        assert_eq!(err.to_string(), "Invalid log level: verbose");
    }

    #[test]
    fn test_unsupported_protocol_version_message() {
        let err = Error::UnsupportedProtocolVersion {
            requested: "1999-01-01".to_string(),
            supported: "2025-06-18, 2025-03-26".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported protocol version: 1999-01-01. Supported versions: 2025-06-18, 2025-03-26"
        );
    }

    #[test]
    fn test_jsonrpc_code_mapping() {
        assert_eq!(Error::Parse("bad".into()).jsonrpc_code(), -32700);
        assert_eq!(
            Error::InvalidRequest("no method".into()).jsonrpc_code(),
            -32600
        );
        assert_eq!(Error::MethodNotFound("x".into()).jsonrpc_code(), -32601);
        assert_eq!(Error::InvalidParams("missing".into()).jsonrpc_code(), -32602);
        assert_eq!(Error::ToolNotFound("x".into()).jsonrpc_code(), -32603);
        assert_eq!(Error::PromptNotFound("x".into()).jsonrpc_code(), -32603);
        assert_eq!(Error::ResourceNotFound("x".into()).jsonrpc_code(), -32002);
        assert_eq!(Error::ShuttingDown.jsonrpc_code(), -32000);
        assert_eq!(
            Error::UnsupportedProtocolVersion {
                requested: "x".into(),
                supported: "y".into()
            }
            .jsonrpc_code(),
            -32000
        );
    }
}
