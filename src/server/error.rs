//! HTTP-facing errors
//!
//! Every failure leaves the server as `{"error": "<message>"}`. Store details
//! are logged here and replaced by a generic message.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::polls::{PollError, VoteError};

const VOTE_FAILED: &str = "An error occurred while casting the vote.";
const INTERNAL: &str = "An internal error occurred.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<VoteError> for ApiError {
    fn from(err: VoteError) -> Self {
        match err {
            VoteError::OptionNotFound | VoteError::UserNotFound => {
                ApiError::NotFound(err.to_string())
            }
            VoteError::DuplicateVote => ApiError::BadRequest(err.to_string()),
            VoteError::Store(e) => {
                tracing::error!("Vote failed on store error: {}", e);
                ApiError::Internal(VOTE_FAILED)
            }
        }
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Invalid(_) | PollError::EmailTaken | PollError::CreatorNotFound => {
                ApiError::BadRequest(err.to_string())
            }
            PollError::PollNotFound => ApiError::NotFound(err.to_string()),
            PollError::Store(e) => {
                tracing::error!("Request failed on store error: {}", e);
                ApiError::Internal(INTERNAL)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
