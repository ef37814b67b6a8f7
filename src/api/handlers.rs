use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::audio::decoder::{CHANNELS, FRAME_BYTES, SAMPLE_RATE};
use crate::queue::{PlayOutcome, QueueEvent};
use crate::resolver::is_uri_allowed;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddSongReq {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct PlayRes {
    pub outcome: PlayOutcome,
}

pub async fn add_song(
    State(state): State<AppState>,
    Json(req): Json<AddSongReq>,
) -> Result<impl IntoResponse, StatusCode> {
    let code = req.code.trim();
    if code.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !is_uri_allowed(&state.cfg.sources, code) {
        warn!(%code, "song code blocked by config patterns");
        return Err(StatusCode::FORBIDDEN);
    }
    let song = state.queue.add_song(code).await;
    Ok((StatusCode::CREATED, Json(song)))
}

pub async fn get_queue(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.queue.snapshot().await)
}

pub async fn play(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.queue.play().await;
    info!(?outcome, "play");
    Json(PlayRes { outcome })
}

pub async fn pause(State(state): State<AppState>) -> impl IntoResponse {
    state.queue.pause().await;
    StatusCode::NO_CONTENT
}

pub async fn skip(State(state): State<AppState>) -> impl IntoResponse {
    let skipped = state.queue.skip().await;
    debug!(skipped, "skip");
    StatusCode::NO_CONTENT
}

pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let snap = state.queue.snapshot().await;
    Json(serde_json::json!({
        "name": "nearer",
        "version": env!("CARGO_PKG_VERSION"),
        "lookahead": state.queue.lookahead(),
        "queued": snap.songs.len(),
        "pending_fetches": snap.pending_fetches,
        "paused": snap.paused,
        "fetch_order": format!("{:?}", state.cfg.fetch_order).to_lowercase(),
        "pcm": { "sample_rate": SAMPLE_RATE, "channels": CHANNELS, "format": "s16le", "frame_ms": 20, "frame_bytes": FRAME_BYTES },
    }))
}

pub async fn version() -> impl IntoResponse {
    env!("CARGO_PKG_VERSION")
}

pub async fn ws_events(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.queue.subscribe();
    info!("event subscriber connected");
    ws.on_upgrade(move |socket| events_task(socket, rx))
}

pub async fn ws_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.stream.subscribe();
    info!("PCM subscriber connected");
    ws.on_upgrade(move |socket| stream_task(socket, rx))
}

async fn events_task(mut socket: WebSocket, mut rx: broadcast::Receiver<QueueEvent>) {
    loop {
        tokio::select! {
            ev = rx.recv() => {
                match ev {
                    Ok(ev) => {
                        let Ok(text) = serde_json::to_string(&ev) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() { break; }
                    }
                    Err(RecvError::Lagged(n)) => warn!(lost = n, "event subscriber lagged; dropped events"),
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("event subscriber disconnected");
}

async fn stream_task(mut socket: WebSocket, mut rx: broadcast::Receiver<Bytes>) {
    let mut ws_forwarded: u64 = 0;
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(pkt) => {
                        if socket.send(Message::Binary(pkt)).await.is_err() { break; }
                        ws_forwarded += 1;
                        if ws_forwarded % 1000 == 0 { info!(ws_forwarded, "WS forwarded frames (summary)"); }
                    }
                    Err(RecvError::Lagged(n)) => warn!(lost = n, "WS lagged; dropped packets"),
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!(ws_forwarded, "PCM subscriber disconnected");
}
