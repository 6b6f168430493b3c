use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

/// Why a site check failed. Only transport-level problems count; any HTTP status is a success.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing query parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}
