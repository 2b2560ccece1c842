//! Error types for the runtime crate.

use pontoon_script::ScriptError;
use thiserror::Error;

/// Errors raised by the native cores and platform services.
///
/// Script-facing validation failures stay in [`ScriptError`]; this type covers
/// everything that happens below the wrapper layer.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("resource is closed")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("verticle factory is not initialized")]
    Uninitialized,

    #[error("script fault: {0}")]
    ScriptFault(String),

    #[error("{0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
