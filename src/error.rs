//! Error types for rdbc-pool
//!
//! The pool absorbs most failures locally (logged, invalid handle returned);
//! only [`Error::NoPooledConnection`] escapes a checkout.

use thiserror::Error;

/// Result type for rdbc-pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rdbc-pool
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Every slot for the database id is checked out. Saturation, not a
    /// transient failure: the pool does not queue waiters.
    #[error("no pooled connection for database {id}")]
    NoPooledConnection { id: usize },

    /// Driver kind is not registered with the registry
    #[error("unknown driver type: {kind}")]
    UnknownDriver { kind: String },

    /// Physical driver failure (open, execute, close)
    #[error("driver error: {message}")]
    Driver {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bad or incomplete settings
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Operation on an invalid handle
    #[error("invalid connection handle")]
    InvalidHandle,

    /// Operation on a descriptor that is not physically open
    #[error("connection not open: {name}")]
    NotOpen { name: String },
}

impl Error {
    /// Create a driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            source: None,
        }
    }

    /// Create a driver error with source
    pub fn driver_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Driver {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error reports pool saturation
    #[inline]
    pub fn is_saturation(&self) -> bool {
        matches!(self, Self::NoPooledConnection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NoPooledConnection { id: 3 };
        assert_eq!(err.to_string(), "no pooled connection for database 3");
        assert!(err.is_saturation());

        let err = Error::driver("connection refused");
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.is_saturation());
    }

    #[test]
    fn test_driver_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::driver_with_source("open failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
