//! Error types for flvgrab core

use flvgrab_types::TaskStatus;
use thiserror::Error;

/// Errors that can occur in flvgrab core
#[derive(Debug, Error)]
pub enum GrabError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {id} is {status}, expected {expected}")]
    InvalidState {
        id: String,
        status: TaskStatus,
        expected: TaskStatus,
    },

    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Relay failed: {0}")]
    Relay(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Fragments seen in errors caused by talking the wrong scheme to a server,
/// e.g. TLS to a plain HTTP port or plain HTTP to a TLS port. Certificate
/// failures must not match: those never fall back to plain http.
const SCHEME_MISMATCH_MARKERS: &[&str] = &[
    "protocol",
    "wrong version number",
    "invalid http version",
    "invalid content type",
    "corrupt message",
];

impl GrabError {
    /// Whether swapping http/https could plausibly fix this failure
    pub fn is_scheme_mismatch(&self) -> bool {
        match self {
            GrabError::Network(e) => {
                if e.is_status() || e.is_timeout() {
                    return false;
                }
                let mut source: Option<&dyn std::error::Error> = Some(e);
                while let Some(err) = source {
                    let text = err.to_string().to_ascii_lowercase();
                    if SCHEME_MISMATCH_MARKERS.iter().any(|m| text.contains(m)) {
                        return true;
                    }
                    source = err.source();
                }
                false
            }
            GrabError::Relay(message) => {
                let text = message.to_ascii_lowercase();
                SCHEME_MISMATCH_MARKERS.iter().any(|m| text.contains(m))
            }
            _ => false,
        }
    }

    /// Errors caused by the caller's input rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GrabError::InvalidUrl(_)
                | GrabError::InvalidInput(_)
                | GrabError::NotFound(_)
                | GrabError::InvalidState { .. }
                | GrabError::AlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_mismatch_from_message() {
        assert!(GrabError::Relay("SSL routines: wrong version number".into()).is_scheme_mismatch());
        assert!(!GrabError::Relay("connection refused".into()).is_scheme_mismatch());
        assert!(GrabError::Relay("invalid HTTP version parsed".into()).is_scheme_mismatch());
        assert!(!GrabError::Relay(
            "error:0A000086:SSL routines:tls_post_process_server_certificate:certificate verify failed"
                .into()
        )
        .is_scheme_mismatch());
        assert!(!GrabError::Relay("invalid peer certificate: UnknownIssuer".into()).is_scheme_mismatch());
        assert!(!GrabError::Relay("TLS handshake eof".into()).is_scheme_mismatch());
        assert!(!GrabError::InvalidUrl("x".into()).is_scheme_mismatch());
    }

    #[test]
    fn test_client_errors() {
        assert!(GrabError::NotFound("a".into()).is_client_error());
        assert!(!GrabError::Timeout("a".into()).is_client_error());
    }
}
