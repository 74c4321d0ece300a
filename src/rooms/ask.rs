use std::sync::Arc;
use std::time::Duration;

use axum::{debug_handler, extract::{Path, State}, response::Response};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    ApiError, ApiResult, AppState, ok,
    oracle::{TutorBlock, TutorOracle},
    ratelimit::RateLimiter,
    session,
};

use super::{
    control::{self, RoomControl},
    directory::{self, Room},
    hub::{RoomEvent, RoomHub},
    msg,
    perms::{self, RoomPermissions},
};

pub const ASK_LIMIT: u32 = 5;
pub const ASK_WINDOW_MS: u64 = 60_000;
pub const TUTOR_TIMEOUT: Duration = Duration::from_secs(30);

fn ask_key(user_id: &str, room_id: Uuid) -> String {
    format!("room:ask:{user_id}:{room_id}")
}

/// The control/permission step of the gate: an exclusive controller
/// overrides the baseline policy for everyone, the owner included.
pub fn authorize(
    room: &Room,
    control: &RoomControl,
    perms: &RoomPermissions,
    user_id: &str,
) -> Result<(), ApiError> {
    match control.controller_user_id.as_deref() {
        Some(controller) if controller == user_id => Ok(()),
        Some(_) => Err(ApiError::NoControl),
        None => perms::check_ask(room, perms, user_id),
    }
}

#[derive(Debug)]
pub struct AskOutcome {
    pub room: Room,
    pub blocks: Vec<TutorBlock>,
}

/// The full gate: membership, rate limit, control/permissions, then the
/// oracle. The system log entry is appended only after the oracle
/// answers; a failed or timed-out call leaves the log untouched, and
/// the rate-limit token it consumed is not refunded.
pub async fn ask(
    db_pool: &SqlitePool,
    limiter: &RateLimiter,
    hub: &RoomHub,
    oracle: &dyn TutorOracle,
    tutor_timeout: Duration,
    room_id: Uuid,
    user_id: &str,
    prompt: &str,
) -> ApiResult<AskOutcome> {
    let room = directory::require(db_pool, room_id).await?;
    if !directory::is_member(db_pool, room_id, user_id).await? {
        return Err(ApiError::NotMember);
    }

    if !limiter.allow(&ask_key(user_id, room_id), ASK_LIMIT, ASK_WINDOW_MS) {
        return Err(ApiError::RateLimit);
    }

    let control = control::ensure(db_pool, room_id).await?;
    let perms = perms::ensure(db_pool, room_id).await?;
    authorize(&room, &control, &perms, user_id)?;

    let blocks = match tokio::time::timeout(
        tutor_timeout,
        oracle.ask(prompt, &room.subject, room_id),
    )
    .await
    {
        Err(_) => return Err(ApiError::TutorTimeout),
        Ok(Err(err)) => return Err(err.into()),
        Ok(Ok(blocks)) => blocks,
    };

    let summary = format!("The tutor answered a {} question from {user_id}.", room.subject);
    let message = msg::append(db_pool, room_id, msg::SYSTEM_SENDER, &summary).await?;
    hub.publish(room_id, RoomEvent::Message { message });

    tracing::info!(room_id = %room_id, user = user_id, blocks = blocks.len(), "tutor answered");
    Ok(AskOutcome { room, blocks })
}

#[derive(Deserialize)]
pub(crate) struct AskBody {
    prompt: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn ask_room(
    State(db_pool): State<SqlitePool>,
    State(limiter): State<RateLimiter>,
    State(hub): State<RoomHub>,
    State(oracle): State<Arc<dyn TutorOracle>>,
    session: Session,
    Path(room_id): Path<Uuid>,
    axum::Json(AskBody { prompt }): axum::Json<AskBody>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::Validation("prompt cannot be empty".to_owned()));
    }

    let outcome = ask(
        &db_pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room_id, &user_id, prompt,
    )
    .await?;

    Ok(ok(serde_json::json!({
        "blocks": outcome.blocks,
        "roomId": room_id,
        "subject": outcome.room.subject,
    })))
}
