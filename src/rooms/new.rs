use axum::{debug_handler, extract::State, response::Response};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{ApiError, ApiResult, ok, session};

use super::directory;

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomBody {
    name: String,
    subject: String,
}

#[debug_handler]
pub(crate) async fn new_room(
    State(db_pool): State<SqlitePool>,
    session: Session,
    axum::Json(NewRoomBody { name, subject }): axum::Json<NewRoomBody>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("room name cannot be empty".to_owned()));
    }

    let room = directory::create(&db_pool, &user_id, name, subject.trim()).await?;
    Ok(ok(room))
}

#[debug_handler]
pub(crate) async fn my_rooms(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;
    Ok(ok(directory::rooms_of(&db_pool, &user_id).await?))
}
