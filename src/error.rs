//! Unified error type.

use http::StatusCode;

/// Result alias used across tern.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by tern's fallible operations.
///
/// Expected HTTP outcomes (404, 405, a denied CORS origin) are plain
/// [`Response`](crate::Response) values, not `Error`s. This type covers
/// startup configuration, infrastructure and backend failures. A handler
/// that returns one gets it rendered as a JSON error envelope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unrecognized profile or malformed setting. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The external key-value store could not be reached within its budget.
    #[error("backend unavailable after {attempts} attempt(s): {reason}")]
    BackendUnavailable { attempts: u32, reason: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn config(var: &str, msg: impl std::fmt::Display) -> Self {
        Self::Config(format!("{var}: {msg}"))
    }

    /// Status code used when this error reaches a client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration_error",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Io(_) | Self::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_service_unavailable() {
        let err = Error::BackendUnavailable { attempts: 3, reason: "refused".into() };
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "backend_unavailable");
        assert_eq!(err.to_string(), "backend unavailable after 3 attempt(s): refused");
    }

    #[test]
    fn config_errors_name_the_variable() {
        let err = Error::config("APP_ENV", "unrecognized profile `staging`");
        assert_eq!(err.to_string(), "configuration error: APP_ENV: unrecognized profile `staging`");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
