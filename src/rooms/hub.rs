use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::msg::RoomMessage;

const CHANNEL_CAPACITY: usize = 64;

/// One broadcast channel per live room. Channels materialize on first
/// use and live for the process; a room with no subscribers just drops
/// published events on the floor.
#[derive(Clone, Default)]
pub struct RoomHub {
    channels: Arc<Mutex<HashMap<Uuid, broadcast::Sender<RoomEvent>>>>,
}

impl RoomHub {
    pub fn channel(&self, room_id: Uuid) -> broadcast::Sender<RoomEvent> {
        self.channels
            .lock()
            .unwrap()
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn publish(&self, room_id: Uuid, event: RoomEvent) {
        let _ = self.channel(room_id).send(event);
    }
}

/// Everything that travels the per-room pub/sub channel, client- and
/// server-originated alike. `room:scene`, `room:chat` and `room:cursor`
/// arrive from clients; the rest are broadcast by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    #[serde(rename = "room:join", rename_all = "camelCase")]
    Join { user_id: String },

    #[serde(rename = "room:leave", rename_all = "camelCase")]
    Leave { user_id: String },

    #[serde(rename = "room:scene", rename_all = "camelCase")]
    Scene { scene: serde_json::Value },

    #[serde(rename = "room:scene-update", rename_all = "camelCase")]
    SceneUpdate {
        from_user_id: String,
        scene: serde_json::Value,
    },

    #[serde(rename = "control:update", rename_all = "camelCase")]
    ControlUpdate {
        controller_user_id: Option<String>,
        action: String,
    },

    #[serde(rename = "perm:update", rename_all = "camelCase")]
    PermUpdate {
        ask_ai_enabled: bool,
        member_ask_ai: Vec<String>,
    },

    #[serde(rename = "room:chat", rename_all = "camelCase")]
    Chat { text: String },

    #[serde(rename = "room:message", rename_all = "camelCase")]
    Message { message: RoomMessage },

    #[serde(rename = "room:cursor", rename_all = "camelCase")]
    Cursor {
        #[serde(default)]
        user_id: String,
        x: f64,
        y: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_with_wire_tags() {
        let event = RoomEvent::ControlUpdate {
            controller_user_id: Some("u1".to_owned()),
            action: "give".to_owned(),
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "control:update");
        assert_eq!(wire["controllerUserId"], "u1");

        let parsed: RoomEvent =
            serde_json::from_str(r#"{"type":"room:cursor","x":1.5,"y":2.0}"#).unwrap();
        match parsed {
            RoomEvent::Cursor { user_id, x, .. } => {
                assert_eq!(user_id, "");
                assert_eq!(x, 1.5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = RoomHub::default();
        hub.publish(Uuid::now_v7(), RoomEvent::Leave { user_id: "u1".to_owned() });
    }

    #[tokio::test]
    async fn subscribers_share_one_room_channel() {
        let hub = RoomHub::default();
        let room_id = Uuid::now_v7();

        let mut rx = hub.channel(room_id).subscribe();
        hub.publish(room_id, RoomEvent::Join { user_id: "u1".to_owned() });

        match rx.recv().await.unwrap() {
            RoomEvent::Join { user_id } => assert_eq!(user_id, "u1"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
