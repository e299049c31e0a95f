use thiserror::Error;

/// Errors from calls to the transcription backend
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Failures to reach the backend and non-2xx responses are transient;
    /// a well-formed reply with missing or malformed content is not, since
    /// repeating the call risks the same malformed result.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Server { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_transient() {
        let err = ApiError::Server {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_malformed_responses_are_not_transient() {
        let err = ApiError::InvalidResponse("missing summary".to_string());
        assert!(!err.is_transient());
    }
}
