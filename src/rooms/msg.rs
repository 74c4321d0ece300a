use axum::{debug_handler, extract::{Path, State}, response::Response};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{ApiError, ApiResult, ok, session};

use super::directory;

/// Sender id for log entries the server writes itself, e.g. the tutor
/// exchange summaries.
pub const SYSTEM_SENDER: &str = "system";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub from_user_id: String,
    pub text: String,
    pub created_at: String,
}

pub async fn append(
    db_pool: &SqlitePool,
    room_id: Uuid,
    from_user_id: &str,
    text: &str,
) -> ApiResult<RoomMessage> {
    let id = Uuid::now_v7();

    let (created_at,): (String,) = sqlx::query_as(
        "INSERT INTO room_messages (id,room_id,sender_id,content,created_at) \
         VALUES (?,?,?,?,strftime('%Y-%m-%dT%H:%M:%fZ','now')) RETURNING created_at",
    )
    .bind(id.to_string())
    .bind(room_id.to_string())
    .bind(from_user_id)
    .bind(text)
    .fetch_one(db_pool)
    .await?;

    Ok(RoomMessage {
        id,
        room_id,
        from_user_id: from_user_id.to_owned(),
        text: text.to_owned(),
        created_at,
    })
}

pub async fn list(db_pool: &SqlitePool, room_id: Uuid) -> ApiResult<Vec<RoomMessage>> {
    // uuid v7 ids sort by creation time
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT id,sender_id,content,created_at FROM room_messages WHERE room_id=? ORDER BY id",
    )
    .bind(room_id.to_string())
    .fetch_all(db_pool)
    .await?;

    rows.into_iter()
        .map(|(id, from_user_id, text, created_at)| {
            Ok(RoomMessage {
                id: Uuid::parse_str(&id).map_err(anyhow::Error::from)?,
                room_id,
                from_user_id,
                text,
                created_at,
            })
        })
        .collect()
}

#[debug_handler]
pub(crate) async fn messages(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    directory::require(&db_pool, room_id).await?;
    if !directory::is_member(&db_pool, room_id, &user_id).await? {
        return Err(ApiError::NotMember);
    }

    Ok(ok(list(&db_pool, room_id).await?))
}
