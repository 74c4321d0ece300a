use tower_sessions::Session;

use crate::{ApiError, ApiResult};

/// Written into the session by the auth frontend; the room core only
/// ever reads it.
pub const USER_ID: &str = "user_id";

pub async fn require_user(session: &Session) -> ApiResult<String> {
    session
        .get::<String>(USER_ID)
        .await?
        .ok_or(ApiError::Unauthenticated)
}
