use axum::extract::State;
use axum::{http::StatusCode, middleware::Next};

use crate::state::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if let Some(pw) = &state.cfg.password {
        if !authorized(pw, req.headers().get(axum::http::header::AUTHORIZATION).and_then(|h| h.to_str().ok())) {
            tracing::debug!(path = %req.uri().path(), "rejected unauthorized request");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

/// Accepts the bare password or `Bearer <password>`.
fn authorized(password: &str, header: Option<&str>) -> bool {
    match header {
        Some(val) => val == password || val.strip_prefix("Bearer ").is_some_and(|v| v == password),
        None => false,
    }
}
