//! Error types for pontoon-script.

use thiserror::Error;

use crate::env::Location;

/// Errors raised by the value-coercion and adapter layer.
#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    /// Wrong argument shape passed to a wrapper method. The message names
    /// the offending parameter and the call site, suffixed with the current
    /// script location.
    #[error("{0}")]
    Argument(String),

    /// A value that had to be callable was not.
    #[error("{0}")]
    NotCallable(String),

    /// A value could not be bridged to the structured wire format.
    #[error("{0}")]
    Conversion(String),

    /// A fault raised inside a script callable.
    #[error("{message}")]
    Fault { message: String, location: Location },
}

impl ScriptError {
    /// Create a fault carrying the interpreter's current location.
    pub fn fault(message: impl Into<String>, location: Location) -> Self {
        Self::Fault {
            message: message.into(),
            location,
        }
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// The script location the error was raised at, when known.
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Fault { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// Result type alias for script-layer operations.
pub type ScriptResult<T> = Result<T, ScriptError>;
