use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors returned by the ingestion handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("AuthorizationCode is required in headers")]
    MissingAuthorization,

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingAuthorization => StatusCode::UNAUTHORIZED,
            ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            // Nothing is echoed back to an unauthenticated caller.
            ApiError::MissingAuthorization => self.status().into_response(),
            ApiError::InvalidBody(_) => {
                let status = self.status();
                let body = serde_json::json!({
                    "success": false,
                    "error": {
                        "code": "BAD_REQUEST",
                        "message": self.to_string(),
                    }
                });
                (status, axum::Json(body)).into_response()
            }
        }
    }
}
