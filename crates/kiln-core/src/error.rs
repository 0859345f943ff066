//! Error types for Kiln

use thiserror::Error;

/// The main error type for Kiln operations
#[derive(Debug, Error)]
pub enum KilnError {
    /// Malformed request options (missing output path, unknown names, no inputs)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A model/variant/format combination the compatibility table forbids
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A provider returned an error payload or an unexpected response shape
    #[error("{provider} backend error: {detail}")]
    BackendError { provider: String, detail: String },

    /// A polled backend never reached a terminal state
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),
}

impl KilnError {
    /// Build a `BackendError` for the named provider
    pub fn backend(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        KilnError::BackendError {
            provider: provider.into(),
            detail: detail.into(),
        }
    }

    /// Wrap any non-backend failure raised while talking to `provider`.
    ///
    /// Errors that already carry backend or timeout semantics pass through.
    pub fn into_backend(self, provider: &str) -> Self {
        match self {
            KilnError::BackendError { .. } | KilnError::TimeoutError(_) => self,
            other => KilnError::backend(provider, other.to_string()),
        }
    }
}

/// Result type alias for Kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;

impl From<toml::de::Error> for KilnError {
    fn from(err: toml::de::Error) -> Self {
        KilnError::TomlParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_names_provider_and_detail() {
        let err = KilnError::backend("meshy", "HTTP 402: insufficient credits");
        let msg = err.to_string();
        assert!(msg.contains("meshy"));
        assert!(msg.contains("insufficient credits"));
    }

    #[test]
    fn test_into_backend_wraps_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.png");
        let err = KilnError::from(io).into_backend("fal");
        match err {
            KilnError::BackendError { provider, detail } => {
                assert_eq!(provider, "fal");
                assert!(detail.contains("missing.png"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_into_backend_keeps_timeout() {
        let err = KilnError::TimeoutError("120 attempts".to_string()).into_backend("meshy");
        assert!(matches!(err, KilnError::TimeoutError(_)));
    }
}
