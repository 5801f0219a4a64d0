//! Render errors including bootstrap, hooks and worker transport.

use prerender_core::RenderCoreError;
use thiserror::Error;

use crate::document::DomError;

/// Render errors including I/O and async operations.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Core error: {0}")]
    Core(#[from] RenderCoreError),

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("Application bootstrap failed: {0}")]
    Bootstrap(#[source] anyhow::Error),

    #[error("The selector {selector:?} did not match any elements")]
    RootNotFound { selector: String },

    #[error("Application stability stream ended before the application became stable")]
    NeverStable,

    #[error("Render hook #{index} failed: {source}")]
    Hook {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Document serialization failed: {0}")]
    Serialization(String),

    #[error("Render already ran; renders are single-pass")]
    AlreadyRendered,

    #[error("Failed to spawn render worker: {0}")]
    WorkerSpawn(String),

    #[error("Worker channel closed")]
    ChannelClosed,

    #[error("Render timeout after {0}ms")]
    Timeout(u64),

    #[error("Service overloaded, retry after {retry_after_secs}s")]
    Overloaded { retry_after_secs: u32 },
}

pub type Result<T> = std::result::Result<T, RenderError>;

impl RenderError {
    /// Whether the error came from invalid configuration rather than from
    /// running the render.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RenderError::Core(
                RenderCoreError::MissingBaseUrl
                    | RenderCoreError::InvalidUrl { .. }
                    | RenderCoreError::InvalidConfig(_)
                    | RenderCoreError::InvalidWorkerCount
                    | RenderCoreError::InvalidTimeout
            )
        )
    }
}

/// Sanitize error messages for client-facing responses.
///
/// Hides internal details while providing useful feedback.
pub fn sanitize_error(error: &RenderError) -> String {
    match error {
        // Safe to expose
        RenderError::Timeout(ms) => format!("Render timed out after {ms}ms"),
        RenderError::ChannelClosed | RenderError::WorkerSpawn(_) => {
            "Service temporarily unavailable".to_string()
        }
        RenderError::Overloaded { retry_after_secs } => {
            format!("Service busy, retry after {retry_after_secs}s")
        }
        // Hide internal details
        RenderError::Core(_) => "Invalid request".to_string(),
        RenderError::Bootstrap(_) | RenderError::RootNotFound { .. } => {
            "Internal configuration error".to_string()
        }
        RenderError::Dom(_)
        | RenderError::NeverStable
        | RenderError::Hook { .. }
        | RenderError::AlreadyRendered => "Render failed".to_string(),
        RenderError::Serialization(_) => "Render produced no output".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_hides_hook_details() {
        let error = RenderError::Hook {
            index: 1,
            source: anyhow::anyhow!("secret database password"),
        };
        assert_eq!(sanitize_error(&error), "Render failed");
        assert!(error.to_string().contains("secret"));
    }

    #[test]
    fn test_sanitize_exposes_timeouts() {
        assert_eq!(
            sanitize_error(&RenderError::Timeout(500)),
            "Render timed out after 500ms"
        );
    }

    #[test]
    fn test_configuration_classification() {
        assert!(RenderError::from(RenderCoreError::MissingBaseUrl).is_configuration());
        assert!(!RenderError::NeverStable.is_configuration());
    }
}
