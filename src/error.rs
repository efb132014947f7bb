//! Error types of the `SafeOut` library
//!
//! Source adapters never return these; their failures are
//! [`crate::sources::SourceError`] and end up as warnings. `SafeOutError`
//! covers startup and query validation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafeOutError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Shared HTTP client could not be built
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Query rejected before any source was asked
    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl SafeOutError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn http_client<S: Into<String>>(message: S) -> Self {
        Self::HttpClient {
            message: message.into(),
        }
    }

    /// Validation failure of one request field
    pub fn validation<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Caller's fault rather than the service's
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, SafeOutError::Validation { .. })
    }

    /// Text safe to return to an HTTP client
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SafeOutError::Validation { field, message } => format!("{field}: {message}"),
            SafeOutError::Config { .. } | SafeOutError::HttpClient { .. } => {
                "Service is misconfigured".to_string()
            }
            SafeOutError::Cache { .. } | SafeOutError::Io { .. } => {
                "Internal storage error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_client_error() {
        let err = SafeOutError::validation("latitude", "must be between -90 and 90");
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Invalid latitude: must be between -90 and 90");
        assert_eq!(err.user_message(), "latitude: must be between -90 and 90");

        assert!(!SafeOutError::config("missing cache dir").is_client_error());
    }

    #[test]
    fn test_internal_details_stay_internal() {
        let err = SafeOutError::cache("keyspace open failed: /var/cache/safeout locked");
        assert!(!err.user_message().contains("/var/cache"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SafeOutError = io_err.into();
        assert!(matches!(err, SafeOutError::Io { .. }));
    }
}
