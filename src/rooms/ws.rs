use axum::{
    debug_handler,
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{ApiError, ApiResult, session};

use super::{
    directory,
    hub::{RoomEvent, RoomHub},
    msg,
    scene::{SCENE_THROTTLE, SceneThrottle},
};

/// Binds one authenticated member connection to the room's channel.
/// Scene traffic goes through a per-connection throttle; chat is
/// persisted then broadcast; cursors are relayed as-is.
#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<RoomHub>,
    session: Session,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let user_id = session::require_user(&session).await?;

    directory::require(&db_pool, room_id).await?;
    if !directory::is_member(&db_pool, room_id, &user_id).await? {
        return Err(ApiError::NotMember);
    }

    let tx = hub.channel(room_id);

    Ok(ws.on_upgrade(async move |stream| {
        let mut rx = tx.subscribe();
        let (mut sender, mut receiver) = stream.split();

        let _ = tx.send(RoomEvent::Join { user_id: user_id.clone() });

        let broadcast_task = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if sender.send(text.into()).await.is_err() {
                    break;
                }
            }
        });

        let throttle = SceneThrottle::new(tx.clone(), user_id.clone(), SCENE_THROTTLE);

        while let Some(Ok(frame)) = receiver.next().await {
            let Ok(event) = serde_json::from_slice::<RoomEvent>(&frame.into_data()) else {
                continue;
            };

            match event {
                RoomEvent::Scene { scene } => throttle.push(scene),
                RoomEvent::Chat { text } => {
                    match msg::append(&db_pool, room_id, &user_id, &text).await {
                        Ok(message) => {
                            let _ = tx.send(RoomEvent::Message { message });
                        }
                        Err(err) => {
                            tracing::warn!(room_id = %room_id, error = %err, "dropping chat message");
                        }
                    }
                }
                RoomEvent::Cursor { x, y, .. } => {
                    let _ = tx.send(RoomEvent::Cursor { user_id: user_id.clone(), x, y });
                }
                _ => {}
            }
        }

        throttle.dispose();
        let _ = tx.send(RoomEvent::Leave { user_id });
        broadcast_task.abort();
    }))
}
