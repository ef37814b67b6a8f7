use axum::{
    routing::{get, post},
    Router,
};

use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub mod handlers;

use handlers::{add_song, get_queue, info, pause, play, skip, version, ws_events, ws_stream};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v0/queue", post(add_song))
        .route("/v0/queue", get(get_queue))
        .route("/v0/play", post(play))
        .route("/v0/pause", post(pause))
        .route("/v0/skip", post(skip))
        .route("/v0/events", get(ws_events))
        .route("/v0/stream", get(ws_stream))
        .route("/info", get(info))
        .route("/version", get(version))
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(state, auth_middleware))
}
