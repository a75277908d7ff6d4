//! HTTP error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flvgrab_core::GrabError;
use serde_json::json;

/// An error answered as `{ "ok": false, "message": ... }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<GrabError> for ApiError {
    fn from(err: GrabError) -> Self {
        let status = match &err {
            GrabError::InvalidUrl(_) | GrabError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GrabError::NotFound(_) => StatusCode::NOT_FOUND,
            GrabError::InvalidState { .. } => StatusCode::BAD_REQUEST,
            GrabError::AlreadyExists(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        }

        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "ok": false, "message": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flvgrab_types::TaskStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GrabError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (GrabError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                GrabError::InvalidState {
                    id: "x".into(),
                    status: TaskStatus::Deleted,
                    expected: TaskStatus::Completed,
                },
                StatusCode::BAD_REQUEST,
            ),
            (GrabError::AlreadyExists("x".into()), StatusCode::CONFLICT),
            (GrabError::Timeout("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}
