//! Error types for mdstream.
//!
//! Rendering never fails from the caller's point of view: parse problems degrade to plain text
//! and display problems degrade to sequential output.  The errors defined here surface at the
//! edges, where a caller has to pick a code path (for example, when no terminal is attached) or
//! where plumbing such as transcript loading touches the filesystem.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::markdown::ParseDegradation;

/// The main error type for mdstream.
#[derive(Clone, Debug)]
pub enum Error {
    /// The output device cannot host a live, in-place redrawn region.
    DisplayUnavailable {
        /// Human-readable error message.
        message: String,
    },

    /// A buffer could not be parsed as markdown.
    ParseDegradation {
        /// Human-readable error message.
        message: String,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// Error during JSON serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// Error during validation of caller-supplied parameters.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Parameter that failed validation.
        param: Option<String>,
    },
}

impl Error {
    /// Creates a new display-unavailable error.
    pub fn display_unavailable(message: impl Into<String>) -> Self {
        Error::DisplayUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new parse degradation error.
    pub fn parse_degradation(message: impl Into<String>) -> Self {
        Error::ParseDegradation {
            message: message.into(),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Returns true if the display cannot host a live region.
    pub fn is_display_unavailable(&self) -> bool {
        matches!(self, Error::DisplayUnavailable { .. })
    }

    /// Returns true if this error is a parse degradation.
    pub fn is_parse_degradation(&self) -> bool {
        matches!(self, Error::ParseDegradation { .. })
    }

    /// Returns true if this error is an I/O error.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. })
    }

    /// Returns true if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DisplayUnavailable { message } => {
                write!(f, "Display unavailable: {message}")
            }
            Error::ParseDegradation { message } => {
                write!(f, "Markdown parse degraded: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Validation { message, param } => {
                if let Some(param) = param {
                    write!(f, "Validation error: {message} (parameter: {param})")
                } else {
                    write!(f, "Validation error: {message}")
                }
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<ParseDegradation> for Error {
    fn from(err: ParseDegradation) -> Self {
        Error::parse_degradation(err.message)
    }
}

/// A specialized Result type for mdstream operations.
pub type Result<T> = std::result::Result<T, Error>;
