//! Error types for the webhook
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the context a log reader needs: the offending
//! selector, the config file path, or the component that failed.

use thiserror::Error;

/// Main error type for webhook operations
#[derive(Debug, Error)]
pub enum Error {
    /// A configured selector could not be parsed
    #[error("selector error for '{selector}': {message}")]
    Selector {
        /// The selector text as it appeared in the configuration
        selector: String,
        /// Description of what's invalid
        message: String,
    },

    /// The decoration config file could not be read or decoded
    #[error("config error for {path}: {message}")]
    Config {
        /// Path of the config file
        path: String,
        /// Description of what failed
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Metric registration or exposition error
    #[error("metrics error: {message}")]
    Metrics {
        /// Description of what failed
        message: String,
    },

    /// Server startup/runtime error
    #[error("server error [{context}]: {message}")]
    Server {
        /// Where the error occurred (e.g. "tls", "bind")
        context: String,
        /// Description of what failed
        message: String,
    },
}

/// Result type for webhook operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Create a selector error for the given selector text
    pub fn selector(selector: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: msg.into(),
        }
    }

    /// Create a config error with file path context
    pub fn config_for(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a metrics error with the given message
    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Metrics {
            message: msg.into(),
        }
    }

    /// Create a server error with context
    pub fn server(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Server {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Get the selector text if this error is about a selector
    pub fn selector_text(&self) -> Option<&str> {
        match self {
            Error::Selector { selector, .. } => Some(selector),
            _ => None,
        }
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Self::metrics(err.to_string())
    }
}
