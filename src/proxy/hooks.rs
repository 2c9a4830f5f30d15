//! Endpoint-indexed hook chain
//!
//! Hooks are looked up by exact request path. A hook may fully handle the
//! response ([`HookOutcome::Handled`]) or defer, in which case the proxy
//! core falls through to reverse-proxying the request upstream unchanged.
//! The map itself is built once at startup and never mutated again (see
//! `AppState::hooks`), so request handling never takes a lock on it.

use std::collections::HashMap;
use std::pin::Pin;

use axum::body::Body;
use axum::http::request::Parts;
use axum::response::Response;
use bytes::Bytes;

use super::handlers;
use super::state::AppState;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub enum HookOutcome {
    Handled(Response<Body>),
    Defer,
}

/// A hook function: plain fn pointer returning a boxed future, so the hooks
/// map can hold heterogeneous async handlers without trait objects per hook.
pub type Hook = fn(AppState, Parts, Bytes) -> BoxFuture<'static, HookOutcome>;

/// Build the frozen path -> hook table. Called exactly once at startup.
/// `/debug` is only registered when `debug_mode` is on.
pub fn build_hooks(debug_mode: bool) -> HashMap<&'static str, Hook> {
    let mut hooks: HashMap<&'static str, Hook> = HashMap::new();
    hooks.insert("/rest/ping", handlers::ping_hook);
    hooks.insert("/rest/ping.view", handlers::ping_hook);
    hooks.insert("/rest/getLicense", handlers::get_license_hook);
    hooks.insert("/rest/getLicense.view", handlers::get_license_hook);
    hooks.insert("/rest/stream", handlers::stream_hook);
    hooks.insert("/rest/stream.view", handlers::stream_hook);
    hooks.insert("/rest/scrobble", handlers::scrobble_hook);
    hooks.insert("/rest/scrobble.view", handlers::scrobble_hook);
    hooks.insert("/rest/getRandomSongs", handlers::get_random_songs_hook);
    hooks.insert("/rest/getRandomSongs.view", handlers::get_random_songs_hook);
    if debug_mode {
        hooks.insert("/debug", handlers::debug_hook);
    }
    hooks
}
