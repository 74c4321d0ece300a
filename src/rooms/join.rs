use axum::{debug_handler, extract::{Path, State}, response::Response};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState, ok_flat, session};

use super::{
    control::{self, RoomControl},
    directory::{self, Member, Room},
    hub::{RoomEvent, RoomHub},
    perms::{self, RoomPermissions},
    scene,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub room: Room,
    pub members: Vec<Member>,
    pub snapshot: Option<serde_json::Value>,
    pub permissions: RoomPermissions,
    pub control: RoomControl,
    pub me: Me,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Me {
    pub user_id: String,
    pub is_owner: bool,
    pub has_control: bool,
}

/// Validates and enrolls `user_id` into the room, then returns one
/// consistent snapshot of everything a client needs to render it.
///
/// Same-school joining doubles as invitation acceptance: if the room
/// owner and the joiner both have a school on file they must match;
/// either side missing an affiliation joins permissively.
pub async fn join(
    db_pool: &SqlitePool,
    hub: &RoomHub,
    room_id: Uuid,
    user_id: &str,
) -> ApiResult<JoinResult> {
    let room = directory::require(db_pool, room_id).await?;

    let owner_school = directory::school_of(db_pool, &room.owner_user_id).await?;
    let user_school = directory::school_of(db_pool, user_id).await?;
    if let (Some(owner_school), Some(user_school)) = (&owner_school, &user_school) {
        if owner_school != user_school {
            return Err(ApiError::CrossSchool);
        }
    }

    let newly_enrolled = !directory::is_member(db_pool, room_id, user_id).await?;
    if newly_enrolled {
        directory::add_member(db_pool, room_id, user_id).await?;
        tracing::info!(room_id = %room_id, user = user_id, "member enrolled");
    }

    let members = directory::list_members(db_pool, &room).await?;
    let snapshot = scene::load(db_pool, room_id).await?;
    let permissions = perms::ensure(db_pool, room_id).await?;
    let control = control::ensure(db_pool, room_id).await?;

    if newly_enrolled {
        hub.publish(room_id, RoomEvent::Join { user_id: user_id.to_owned() });
    }

    let me = Me {
        user_id: user_id.to_owned(),
        is_owner: user_id == room.owner_user_id,
        has_control: control.controller_user_id.as_deref() == Some(user_id),
    };

    Ok(JoinResult { room, members, snapshot, permissions, control, me })
}

#[debug_handler(state = AppState)]
pub(crate) async fn join_room(
    State(db_pool): State<SqlitePool>,
    State(hub): State<RoomHub>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;
    ok_flat(join(&db_pool, &hub, room_id, &user_id).await?)
}

#[derive(Deserialize)]
pub(crate) struct JoinByCodeBody {
    code: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn join_by_code(
    State(db_pool): State<SqlitePool>,
    State(hub): State<RoomHub>,
    session: Session,
    axum::Json(JoinByCodeBody { code }): axum::Json<JoinByCodeBody>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    let room = directory::find_by_invite(&db_pool, code.trim())
        .await?
        .ok_or(ApiError::RoomNotFound)?;

    ok_flat(join(&db_pool, &hub, room.id, &user_id).await?)
}
