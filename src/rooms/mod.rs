pub mod ask;
pub mod control;
pub mod directory;
pub mod hub;
pub mod join;
pub mod msg;
pub mod perms;
pub mod scene;
mod new;
mod ws;

use axum::{Router, routing::{get, post}};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(new::my_rooms))
        .route("/new", post(new::new_room))
        .route("/join", post(join::join_by_code))
        .route("/{room_id}/join", post(join::join_room))
        .route("/{room_id}/ask", post(ask::ask_room))
        .route("/{room_id}/control", get(control::get_control).post(control::update_control))
        .route("/{room_id}/perms", get(perms::get_perms).post(perms::update_perms))
        .route("/{room_id}/scene", get(scene::get_scene).post(scene::save_scene))
        .route("/{room_id}/messages", get(msg::messages))
        .route("/{room_id}/ws", get(ws::room_ws))
}
