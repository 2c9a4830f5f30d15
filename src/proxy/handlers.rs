//! Endpoint-specific request interceptors
//!
//! Each hook receives the request's head (`Parts`) and body, and returns
//! [`HookOutcome::Handled`] to short-circuit the pipeline or
//! [`HookOutcome::Defer`] to let the proxy core reverse-proxy the request
//! upstream unchanged.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::models::EventType;
use crate::subsonic::{self, ResponseFormat};

use super::hooks::{BoxFuture, HookOutcome};
use super::state::AppState;

const DEFAULT_SIZE: i64 = 50;
const MAX_SIZE: i64 = 10_000;
const MAX_USERNAME_LEN: usize = 100;

/// Parse a request URI's query string into a lookup map. Subsonic params are
/// never repeated, so last-value-wins is an acceptable simplification.
pub fn query_params(uri: &axum::http::Uri) -> HashMap<String, String> {
    let url = match reqwest::Url::parse(&format!("http://subsoxy.local{}", uri)) {
        Ok(u) => u,
        Err(_) => return HashMap::new(),
    };
    url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub fn ping_hook(_state: AppState, parts: Parts, _body: Bytes) -> BoxFuture<'static, HookOutcome> {
    Box::pin(async move {
        let params = query_params(&parts.uri);
        tracing::debug!(user = params.get("u").map(String::as_str), "ping");
        HookOutcome::Defer
    })
}

pub fn get_license_hook(_state: AppState, parts: Parts, _body: Bytes) -> BoxFuture<'static, HookOutcome> {
    Box::pin(async move {
        let params = query_params(&parts.uri);
        tracing::debug!(user = params.get("u").map(String::as_str), "getLicense");
        HookOutcome::Defer
    })
}

/// `stream`: records a pending-song correlation and emits a `start` event,
/// resolving any previously-pending song as a `skip` if it differs.
pub fn stream_hook(state: AppState, parts: Parts, _body: Bytes) -> BoxFuture<'static, HookOutcome> {
    Box::pin(async move {
        let params = query_params(&parts.uri);
        let (user, song_id) = match (params.get("u"), params.get("id")) {
            (Some(u), Some(id)) => (truncate(u, MAX_USERNAME_LEN), id.clone()),
            _ => {
                tracing::warn!("stream request missing u or id parameter");
                return HookOutcome::Defer;
            }
        };

        let previous = state.pending.swap(&user, &song_id);

        if let Some(prev_id) = &previous {
            if prev_id != &song_id {
                if let Err(e) = state.storage.record_play_event(&user, prev_id, &EventType::Skip, None) {
                    tracing::error!(user = %user, song = %prev_id, error = %e, "failed to record skip event");
                }
            }
        }

        let previous_for_start = previous.as_deref().filter(|p| *p != song_id);
        if let Err(e) = state.storage.record_play_event(&user, &song_id, &EventType::Start, previous_for_start) {
            tracing::error!(user = %user, song = %song_id, error = %e, "failed to record start event");
        }

        HookOutcome::Defer
    })
}

/// `scrobble`: `submission=true` resolves the pending song as a `play` and
/// updates the shuffle engine's per-user "last played" pointer.
/// `submission=false` is explicitly not a skip and emits nothing.
pub fn scrobble_hook(state: AppState, parts: Parts, _body: Bytes) -> BoxFuture<'static, HookOutcome> {
    Box::pin(async move {
        let params = query_params(&parts.uri);
        let (user, song_id) = match (params.get("u"), params.get("id")) {
            (Some(u), Some(id)) => (truncate(u, MAX_USERNAME_LEN), id.clone()),
            _ => {
                tracing::warn!("scrobble request missing u or id parameter");
                return HookOutcome::Defer;
            }
        };
        let submission = params.get("submission").map(|v| v == "true").unwrap_or(true);

        if submission {
            state.pending.take_if(&user, &song_id);
            if let Err(e) = state.storage.record_play_event(&user, &song_id, &EventType::Play, None) {
                tracing::error!(user = %user, song = %song_id, error = %e, "failed to record play event");
            } else {
                state.shuffle.set_last_played(&user, &song_id);
            }
        } else {
            tracing::debug!(user = %user, song = %song_id, "scrobble submission=false, no emission");
        }

        HookOutcome::Defer
    })
}

/// `getRandomSongs`: fully intercepted, never forwarded upstream.
pub fn get_random_songs_hook(state: AppState, parts: Parts, _body: Bytes) -> BoxFuture<'static, HookOutcome> {
    Box::pin(async move {
        let params = query_params(&parts.uri);
        let response = handle_get_random_songs(&state, &params).await;
        HookOutcome::Handled(response)
    })
}

async fn handle_get_random_songs(state: &AppState, params: &HashMap<String, String>) -> Response {
    let Some(user) = params.get("u") else {
        return (StatusCode::BAD_REQUEST, "Missing user parameter").into_response();
    };
    let user = truncate(user, MAX_USERNAME_LEN);

    let size = match params.get("size") {
        None => DEFAULT_SIZE,
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if n <= 0 => DEFAULT_SIZE,
            Ok(n) if n > MAX_SIZE => {
                return (StatusCode::BAD_REQUEST, format!("size must be <= {}", MAX_SIZE)).into_response();
            }
            Ok(n) => n,
            Err(_) => return (StatusCode::BAD_REQUEST, "Invalid size parameter").into_response(),
        },
    };

    let format = ResponseFormat::from_param(params.get("f").map(String::as_str));

    let songs = match state.shuffle.weighted_sample(&user, size as usize) {
        Ok(songs) => songs,
        Err(e) => {
            tracing::error!(user = %user, error = %e, "weighted_sample failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "shuffle failed").into_response();
        }
    };

    let body = subsonic::random_songs_body(format, &songs);
    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, format.content_type())
        .body(Body::from(body))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response build failed").into_response())
}

/// `/debug`: HTML weight-inspection view for one user, gated by `debug_mode`.
pub fn debug_hook(state: AppState, parts: Parts, _body: Bytes) -> BoxFuture<'static, HookOutcome> {
    Box::pin(async move {
        let params = query_params(&parts.uri);
        let response = handle_debug(&state, &params).await;
        HookOutcome::Handled(response)
    })
}

async fn handle_debug(state: &AppState, params: &HashMap<String, String>) -> Response {
    let Some(user) = params.get("u") else {
        return (StatusCode::BAD_REQUEST, "Missing user parameter").into_response();
    };

    let weights = match state.shuffle.all_weights(user) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(user = %user, error = %e, "failed to compute debug weights");
            return (StatusCode::INTERNAL_SERVER_ERROR, "weight computation failed").into_response();
        }
    };

    let mut rows = String::new();
    for w in &weights {
        let total = w.total();
        let band = if total >= 2.0 {
            "high"
        } else if total >= 1.0 {
            "medium"
        } else {
            "low"
        };
        rows.push_str(&format!(
            "<tr class=\"{band}\"><td>{}</td><td>{}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td><b>{:.3}</b></td></tr>\n",
            html_escape(&w.song.id),
            html_escape(&w.song.title),
            w.never_bonus,
            w.w_time,
            w.w_ratio,
            w.w_trans,
            w.w_artist,
            total,
        ));
    }

    let html = format!(
        r#"<!DOCTYPE html><html><head><title>subsoxy debug: {user}</title><style>
body {{ font-family: monospace; }}
table {{ border-collapse: collapse; width: 100%; }}
td, th {{ border: 1px solid #ccc; padding: 4px 8px; }}
tr.high {{ background: #d4f4dd; }}
tr.medium {{ background: #fff6d5; }}
tr.low {{ background: #fbdede; }}
</style></head><body>
<h1>Weight breakdown for {user}</h1>
<table><thead><tr><th>id</th><th>title</th><th>never_bonus</th><th>w_time</th><th>w_ratio</th><th>w_trans</th><th>w_artist</th><th>total</th></tr></thead>
<tbody>
{rows}</tbody></table>
</body></html>"#,
        user = html_escape(user),
        rows = rows,
    );

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
