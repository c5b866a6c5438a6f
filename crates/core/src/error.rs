//! Error taxonomy shared by the client components.

/// Failures of a user-initiated stream transition (Start or Stop).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("Backend is not healthy. Please try again later.")]
    BackendUnavailable,
    #[error("Failed to start video stream: {0}")]
    StreamStartFailed(String),
    #[error("Another start/stop transition is already in progress")]
    TransitionInProgress,
    #[error("Video stream is already running")]
    AlreadyStreaming,
}

/// Errors raised by a [`crate::backend::Backend`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Unexpected status code {0}")]
    Status(u16),
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

/// An inbound recognition payload that does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed recognition event: {0}")]
pub struct MalformedEvent(pub String);

/// Failures reported by a speech synthesizer backend.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Speech synthesizer is not available: {0}")]
    Unavailable(String),
    #[error("Speech synthesis failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_display() {
        assert_eq!(
            ControlError::BackendUnavailable.to_string(),
            "Backend is not healthy. Please try again later."
        );
        assert_eq!(
            ControlError::StreamStartFailed("Unexpected status code 500".into()).to_string(),
            "Failed to start video stream: Unexpected status code 500"
        );
    }

    #[test]
    fn test_backend_error_display() {
        assert_eq!(
            BackendError::Status(503).to_string(),
            "Unexpected status code 503"
        );
        assert!(
            BackendError::Timeout(std::time::Duration::from_secs(10))
                .to_string()
                .contains("10s")
        );
    }
}
