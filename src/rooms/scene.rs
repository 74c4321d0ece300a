use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{debug_handler, extract::{Path, State}, response::{IntoResponse, Response}, Json};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{ApiError, ApiResult, session};

use super::{directory, hub::RoomEvent};

pub const SCENE_THROTTLE: Duration = Duration::from_millis(200);

pub async fn load(db_pool: &SqlitePool, room_id: Uuid) -> ApiResult<Option<Value>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT scene FROM room_snapshots WHERE room_id=?")
        .bind(room_id.to_string())
        .fetch_optional(db_pool)
        .await?;

    match row {
        Some((scene,)) => Ok(Some(serde_json::from_str(&scene)?)),
        None => Ok(None),
    }
}

/// Last-writer-wins: the stored snapshot is replaced wholesale.
pub async fn save(db_pool: &SqlitePool, room_id: Uuid, scene: &Value) -> ApiResult<()> {
    sqlx::query(
        "INSERT INTO room_snapshots (room_id,scene,updated_at) \
         VALUES (?,?,strftime('%Y-%m-%dT%H:%M:%fZ','now')) \
         ON CONFLICT(room_id) DO UPDATE SET scene=excluded.scene, updated_at=excluded.updated_at",
    )
    .bind(room_id.to_string())
    .bind(serde_json::to_string(scene)?)
    .execute(db_pool)
    .await?;
    Ok(())
}

struct ThrottleInner {
    last_sent: Option<Instant>,
    pending: Option<Value>,
    flush: Option<JoinHandle<()>>,
}

/// Leading+trailing throttle for one subscriber's scene stream. The
/// first change in a burst broadcasts immediately; later changes inside
/// the window collapse into a single trailing broadcast carrying only
/// the newest scene. `dispose` cancels the trailing timer; intermediate
/// states are never sent.
pub struct SceneThrottle {
    window: Duration,
    user_id: String,
    tx: broadcast::Sender<RoomEvent>,
    inner: Arc<Mutex<ThrottleInner>>,
}

impl SceneThrottle {
    pub fn new(tx: broadcast::Sender<RoomEvent>, user_id: String, window: Duration) -> Self {
        Self {
            window,
            user_id,
            tx,
            inner: Arc::new(Mutex::new(ThrottleInner {
                last_sent: None,
                pending: None,
                flush: None,
            })),
        }
    }

    pub fn push(&self, scene: Value) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        match inner.last_sent {
            Some(sent) if now.duration_since(sent) < self.window => {
                inner.pending = Some(scene);
                if inner.flush.is_none() {
                    inner.flush = Some(self.spawn_flush(sent + self.window));
                }
            }
            _ => {
                let _ = self.tx.send(RoomEvent::SceneUpdate {
                    from_user_id: self.user_id.clone(),
                    scene,
                });
                inner.last_sent = Some(now);
            }
        }
    }

    fn spawn_flush(&self, deadline: Instant) -> JoinHandle<()> {
        let state = Arc::clone(&self.inner);
        let tx = self.tx.clone();
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut inner = state.lock().unwrap();
            if let Some(scene) = inner.pending.take() {
                let _ = tx.send(RoomEvent::SceneUpdate { from_user_id: user_id, scene });
                inner.last_sent = Some(Instant::now());
            }
            inner.flush = None;
        })
    }

    pub fn dispose(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(flush) = inner.flush.take() {
            flush.abort();
        }
        inner.pending = None;
    }
}

impl Drop for SceneThrottle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[debug_handler]
pub(crate) async fn get_scene(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    directory::require(&db_pool, room_id).await?;
    if !directory::is_member(&db_pool, room_id, &user_id).await? {
        return Err(ApiError::NotMember);
    }

    let snapshot = load(&db_pool, room_id).await?;
    Ok(Json(json!({ "snapshot": snapshot })).into_response())
}

#[derive(Deserialize)]
pub(crate) struct SaveSceneBody {
    snapshot: Value,
}

#[debug_handler]
pub(crate) async fn save_scene(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(room_id): Path<Uuid>,
    Json(SaveSceneBody { snapshot }): Json<SaveSceneBody>,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    directory::require(&db_pool, room_id).await?;
    if !directory::is_member(&db_pool, room_id, &user_id).await? {
        return Err(ApiError::NotMember);
    }

    save(&db_pool, room_id, &snapshot).await?;
    Ok(Json(json!({ "snapshot": snapshot })).into_response())
}
