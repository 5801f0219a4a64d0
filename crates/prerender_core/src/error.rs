//! Core render errors (pure - no I/O variants).

use thiserror::Error;

/// Maximum size for the serialized transfer-state JSON (5MB).
pub const MAX_TRANSFER_STATE_SIZE: usize = 5 * 1024 * 1024;

/// Core render errors (pure - no I/O variants).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderCoreError {
    #[error("\"PlatformConfig.base_url\" must be set if \"use_absolute_url\" is true")]
    MissingBaseUrl,

    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Transfer state serialization failed: {0}")]
    Serialization(String),

    #[error("Worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("Render timeout must be positive")]
    InvalidTimeout,

    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, RenderCoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_base_url_names_the_field() {
        let message = RenderCoreError::MissingBaseUrl.to_string();
        assert!(message.contains("PlatformConfig.base_url"));
        assert!(message.contains("use_absolute_url"));
    }

    #[test]
    fn test_invalid_url_display() {
        let error = RenderCoreError::InvalidUrl {
            url: "http://".to_string(),
            reason: "missing host".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid URL \"http://\": missing host");
    }
}
