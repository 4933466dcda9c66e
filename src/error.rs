use thiserror::Error;

use crate::schema::{
    ErrorObject, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, JSONRPCError,
    METHOD_NOT_FOUND, PARSE_ERROR, RequestId,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map protocol-level failures onto a JSON-RPC error response.
    ///
    /// Returns `None` for errors without a dedicated JSON-RPC code; the caller
    /// reports those as internal errors.
    pub fn to_jsonrpc_response(&self, id: RequestId) -> Option<JSONRPCError> {
        let code = match self {
            Error::InvalidMessageFormat { .. } | Error::Json(_) => PARSE_ERROR,
            Error::InvalidRequest(_) => INVALID_REQUEST,
            Error::MethodNotFound(_) | Error::ToolNotFound(_) => METHOD_NOT_FOUND,
            Error::InvalidParams(_) => INVALID_PARAMS,
            Error::InternalError(_) => INTERNAL_ERROR,
            _ => return None,
        };
        Some(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: self.to_string(),
                data: None,
            },
        })
    }

    /// Whether the upstream rejected our credentials and a fresh token may help.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Network(format!("request timed out: {e}"))
        } else if e.is_connect() || e.is_request() {
            Error::Network(e.to_string())
        } else if e.is_decode() {
            Error::Api {
                code: "decode".to_string(),
                message: e.to_string(),
            }
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Credential(e.to_string())
    }
}
