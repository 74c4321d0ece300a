use axum::{debug_handler, extract::{Path, State}, response::Response};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState, ok, session};

use super::{directory, directory::Room, hub::{RoomEvent, RoomHub}};

/// Baseline ask-AI policy for a room, consulted only while no exclusive
/// controller is set. The allow-list keeps grant order.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPermissions {
    pub room_id: Uuid,
    pub ask_ai_enabled: bool,
    pub member_ask_ai: Vec<String>,
}

/// Get-or-create with defaults: ask-AI disabled, empty allow-list.
/// The owner bypass makes the default invisible to owners; everyone
/// else starts denied until the owner opts the room in.
pub async fn ensure(db_pool: &SqlitePool, room_id: Uuid) -> ApiResult<RoomPermissions> {
    sqlx::query(
        "INSERT OR IGNORE INTO room_permissions (room_id,ask_ai_enabled,member_ask_ai) VALUES (?,0,'[]')",
    )
    .bind(room_id.to_string())
    .execute(db_pool)
    .await?;

    let (ask_ai_enabled, member_ask_ai): (bool, String) =
        sqlx::query_as("SELECT ask_ai_enabled,member_ask_ai FROM room_permissions WHERE room_id=?")
            .bind(room_id.to_string())
            .fetch_one(db_pool)
            .await?;

    Ok(RoomPermissions {
        room_id,
        ask_ai_enabled,
        member_ask_ai: serde_json::from_str(&member_ask_ai)?,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionUpdate {
    pub ask_ai_enabled: Option<bool>,
    pub grant_user_id: Option<String>,
    pub revoke_user_id: Option<String>,
}

/// Applies the three optional mutations in a fixed order: flag, then
/// grant, then revoke. Granting a non-member is a validation error.
pub async fn update(
    db_pool: &SqlitePool,
    room: &Room,
    update: PermissionUpdate,
) -> ApiResult<RoomPermissions> {
    let mut perms = ensure(db_pool, room.id).await?;

    if let Some(enabled) = update.ask_ai_enabled {
        perms.ask_ai_enabled = enabled;
    }

    if let Some(user_id) = update.grant_user_id {
        if !directory::is_member(db_pool, room.id, &user_id).await? {
            return Err(ApiError::Validation(format!(
                "cannot grant ask-ai to {user_id}: not a room member"
            )));
        }
        if !perms.member_ask_ai.contains(&user_id) {
            perms.member_ask_ai.push(user_id);
        }
    }

    if let Some(user_id) = update.revoke_user_id {
        perms.member_ask_ai.retain(|u| u != &user_id);
    }

    sqlx::query("UPDATE room_permissions SET ask_ai_enabled=?, member_ask_ai=? WHERE room_id=?")
        .bind(perms.ask_ai_enabled)
        .bind(serde_json::to_string(&perms.member_ask_ai)?)
        .bind(room.id.to_string())
        .execute(db_pool)
        .await?;

    Ok(perms)
}

/// The baseline allow/deny ladder: owners always pass, then the global
/// flag, then the allow-list (an empty list admits every member).
pub fn check_ask(room: &Room, perms: &RoomPermissions, user_id: &str) -> Result<(), ApiError> {
    if user_id == room.owner_user_id {
        return Ok(());
    }
    if !perms.ask_ai_enabled {
        return Err(ApiError::AskAiDisabled("ask-ai is disabled in this room"));
    }
    if !perms.member_ask_ai.is_empty() && !perms.member_ask_ai.iter().any(|u| u == user_id) {
        return Err(ApiError::AskAiDisabled("you are not on the ask-ai list for this room"));
    }
    Ok(())
}

#[debug_handler]
pub(crate) async fn get_perms(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    directory::require(&db_pool, room_id).await?;
    if !directory::is_member(&db_pool, room_id, &user_id).await? {
        return Err(ApiError::NotMember);
    }

    Ok(ok(ensure(&db_pool, room_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn update_perms(
    State(db_pool): State<SqlitePool>,
    State(hub): State<RoomHub>,
    session: Session,
    Path(room_id): Path<Uuid>,
    axum::Json(body): axum::Json<PermissionUpdate>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    let room = directory::require(&db_pool, room_id).await?;
    if user_id != room.owner_user_id {
        return Err(ApiError::NotOwner);
    }

    let perms = update(&db_pool, &room, body).await?;

    hub.publish(room_id, RoomEvent::PermUpdate {
        ask_ai_enabled: perms.ask_ai_enabled,
        member_ask_ai: perms.member_ask_ai.clone(),
    });

    Ok(ok(perms))
}
