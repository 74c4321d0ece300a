use axum::{debug_handler, extract::{Path, State}, response::Response};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState, ok, session};

use super::{directory, directory::Room, hub::{RoomEvent, RoomHub}};

/// Exclusive-speaker token for tutor queries. While `controller_user_id`
/// is set, the baseline permission policy is overridden for everyone,
/// the owner included.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomControl {
    pub room_id: Uuid,
    pub controller_user_id: Option<String>,
}

/// Get-or-create with no controller set.
pub async fn ensure(db_pool: &SqlitePool, room_id: Uuid) -> ApiResult<RoomControl> {
    sqlx::query("INSERT OR IGNORE INTO room_control (room_id,controller_id) VALUES (?,NULL)")
        .bind(room_id.to_string())
        .execute(db_pool)
        .await?;

    let (controller_user_id,): (Option<String>,) =
        sqlx::query_as("SELECT controller_id FROM room_control WHERE room_id=?")
            .bind(room_id.to_string())
            .fetch_one(db_pool)
            .await?;

    Ok(RoomControl { room_id, controller_user_id })
}

async fn set(
    db_pool: &SqlitePool,
    room_id: Uuid,
    controller_user_id: Option<&str>,
) -> ApiResult<RoomControl> {
    sqlx::query("UPDATE room_control SET controller_id=? WHERE room_id=?")
        .bind(controller_user_id)
        .bind(room_id.to_string())
        .execute(db_pool)
        .await?;

    Ok(RoomControl {
        room_id,
        controller_user_id: controller_user_id.map(str::to_owned),
    })
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Hand the microphone to a member.
    Give,
    /// Clear the controller, reverting to the permission policy.
    Revoke,
    /// The owner takes the microphone themself.
    Take,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Give => "give",
            ControlAction::Revoke => "revoke",
            ControlAction::Take => "take",
        }
    }
}

/// Owner-only state transitions. `give` requires the target to be a
/// current member.
pub async fn apply(
    db_pool: &SqlitePool,
    room: &Room,
    actor_user_id: &str,
    action: ControlAction,
    target_user_id: Option<&str>,
) -> ApiResult<RoomControl> {
    if actor_user_id != room.owner_user_id {
        return Err(ApiError::NotOwner);
    }

    ensure(db_pool, room.id).await?;

    let controller = match action {
        ControlAction::Give => {
            let target = target_user_id.ok_or_else(|| {
                ApiError::Validation("give requires a targetUserId".to_owned())
            })?;
            if !directory::is_member(db_pool, room.id, target).await? {
                return Err(ApiError::Validation(format!(
                    "cannot give control to {target}: not a room member"
                )));
            }
            Some(target)
        }
        ControlAction::Revoke => None,
        ControlAction::Take => Some(actor_user_id),
    };

    let control = set(db_pool, room.id, controller).await?;
    tracing::info!(
        room_id = %room.id,
        action = action.as_str(),
        controller = control.controller_user_id.as_deref().unwrap_or("-"),
        "control changed"
    );
    Ok(control)
}

#[debug_handler]
pub(crate) async fn get_control(
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

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ControlUpdateBody {
    action: ControlAction,
    target_user_id: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn update_control(
    State(db_pool): State<SqlitePool>,
    State(hub): State<RoomHub>,
    session: Session,
    Path(room_id): Path<Uuid>,
    axum::Json(ControlUpdateBody { action, target_user_id }): axum::Json<ControlUpdateBody>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    let room = directory::require(&db_pool, room_id).await?;
    let control = apply(&db_pool, &room, &user_id, action, target_user_id.as_deref()).await?;

    hub.publish(room_id, RoomEvent::ControlUpdate {
        controller_user_id: control.controller_user_id.clone(),
        action: action.as_str().to_owned(),
    });

    Ok(ok(serde_json::json!({
        "controllerUserId": control.controller_user_id,
        "action": action.as_str(),
    })))
}
