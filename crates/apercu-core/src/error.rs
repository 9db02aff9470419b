//! Error types shared by the transport, the chain RPC service and the tail engine.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::request::JsonRpcError;

/// The single error kind for every transport or protocol failure.
///
/// Connection failures, a socket closing mid-flight, JSON-RPC `error`
/// payloads and malformed wire objects all end up here. `code` and `data`
/// are only set when the node returned a JSON-RPC error object.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RpcError {
    pub message: String,
    pub code: Option<i64>,
    pub data: Option<Value>,
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RpcError {
    /// Message used when a socket closes with work still outstanding.
    pub const CLOSED: &'static str = "WebSocket closed";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
            cause: None,
        }
    }

    /// The error every pending request receives when its socket closes.
    pub fn closed() -> Self {
        Self::new(Self::CLOSED)
    }

    /// Attach the underlying error for diagnostics.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// A wire object was missing a field or carried one of the wrong shape.
    pub fn malformed(what: impl std::fmt::Display) -> Self {
        Self::new(format!("malformed {what}"))
    }

    /// Returns `true` if this error was produced by a socket close.
    pub fn is_closed(&self) -> bool {
        self.message == Self::CLOSED
    }
}

impl From<JsonRpcError> for RpcError {
    fn from(err: JsonRpcError) -> Self {
        Self {
            message: err.message,
            code: Some(err.code),
            data: err.data,
            cause: None,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid JSON: {err}")).with_cause(err)
    }
}

/// Invalid local input. Fatal, never retried, raised before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing contract address")]
    MissingAddress,

    #[error("missing RPC URL (pass --rpc or set APERCU_RPC_URL)")]
    MissingRpcUrl,

    #[error("invalid RPC URL '{url}': {reason}")]
    InvalidRpcUrl { url: String, reason: String },

    #[error("invalid value for {option}: {reason}")]
    InvalidOption { option: String, reason: String },
}

impl ConfigError {
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}
