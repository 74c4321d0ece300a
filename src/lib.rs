pub mod db;
pub mod oracle;
pub mod ratelimit;
pub mod rooms;
pub mod session;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{oracle::{OracleError, TutorOracle}, ratelimit::RateLimiter, rooms::hub::RoomHub};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub hub: RoomHub,
    pub limiter: RateLimiter,
    pub oracle: Arc<dyn TutorOracle>,
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Every denial the API can produce, each with its own wire code so
/// clients branch on `code` instead of string-matching messages.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("sign in to continue")]
    Unauthenticated,
    #[error("room not found")]
    RoomNotFound,
    #[error("you are not a member of this room")]
    NotMember,
    #[error("only the room owner can do that")]
    NotOwner,
    #[error("this room belongs to a different school")]
    CrossSchool,
    #[error("another member currently holds tutor control")]
    NoControl,
    #[error("{0}")]
    AskAiDisabled(&'static str),
    #[error("too many tutor requests, try again in a minute")]
    RateLimit,
    #[error("{0}")]
    Validation(String),
    #[error("the tutor is out of capacity right now")]
    TutorQuota,
    #[error("the tutor is not configured correctly")]
    TutorConfig,
    #[error("the tutor took too long to answer")]
    TutorTimeout,
    #[error("the tutor request failed")]
    TutorFailed(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "UNAUTHORIZED",
            ApiError::RoomNotFound => "ROOM_NOT_FOUND",
            ApiError::NotMember => "NOT_MEMBER",
            ApiError::NotOwner => "NOT_OWNER",
            ApiError::CrossSchool => "CROSS_SCHOOL",
            ApiError::NoControl => "NO_CONTROL",
            ApiError::AskAiDisabled(_) => "ASK_AI_DISABLED",
            ApiError::RateLimit => "RATE_LIMIT",
            ApiError::Validation(_) => "VALIDATION",
            ApiError::TutorQuota => "TUTOR_QUOTA",
            ApiError::TutorConfig => "TUTOR_CONFIG",
            ApiError::TutorTimeout => "TUTOR_TIMEOUT",
            ApiError::TutorFailed(_) => "TUTOR_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::RoomNotFound => StatusCode::NOT_FOUND,
            ApiError::NotMember
            | ApiError::NotOwner
            | ApiError::CrossSchool
            | ApiError::NoControl
            | ApiError::AskAiDisabled(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::TutorQuota | ApiError::TutorTimeout => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::TutorConfig | ApiError::TutorFailed(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            // expected backpressure, not an error
            ApiError::RateLimit => tracing::debug!("rate limit hit"),
            ApiError::TutorFailed(err) => tracing::warn!(error = %err, "tutor request failed"),
            ApiError::Internal(err) => tracing::error!(error = %err, "internal error"),
            _ => {}
        }

        (
            self.status(),
            Json(json!({
                "success": false,
                "code": self.code(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

impl From<OracleError> for ApiError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Quota => ApiError::TutorQuota,
            OracleError::Config => ApiError::TutorConfig,
            OracleError::Timeout => ApiError::TutorTimeout,
            OracleError::Upstream(err) => ApiError::TutorFailed(err),
        }
    }
}

macro_rules! internal_impl {
    ($E:ty) => {
        impl From<$E> for ApiError {
            fn from(err: $E) -> Self {
                Self::Internal(anyhow::Error::from(err))
            }
        }
    };
}

internal_impl!(serde_json::Error);
internal_impl!(sqlx::Error);
internal_impl!(tower_sessions::session::Error);
internal_impl!(axum::Error);
internal_impl!(reqwest::Error);

/// `{success: true, data: …}` envelope.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

/// Flattens `data`'s own fields next to `success` instead of nesting
/// them, for the handlers whose wire shape is top-level.
pub fn ok_flat<T: Serialize>(data: T) -> ApiResult<Response> {
    let mut value = serde_json::to_value(data)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("success".to_owned(), json!(true));
    }
    Ok(Json(value).into_response())
}
