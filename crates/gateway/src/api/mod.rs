//! HTTP surface: one axum `Router` wired to the handlers in this module.

pub mod chats;
pub mod error;
pub mod stream;
pub mod turns;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chats/:chat_id/turns", post(chats::create_turn).get(chats::list_chat_turns))
        .route("/api/turns/:turn_id/stream", get(stream::stream_turn))
        .route("/api/turns/:turn_id/blocks", get(turns::get_turn_blocks))
        .route("/api/turns/:turn_id/path", get(turns::get_turn_path))
        .route("/api/turns/:turn_id/siblings", get(turns::get_turn_siblings))
        .route("/api/turns/:turn_id/interrupt", post(turns::interrupt_turn))
}
