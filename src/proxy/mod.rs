//! Proxy core: reverse proxy with an endpoint-indexed hook chain
//!
//! Every inbound request passes through, in order: the CORS envelope, the
//! security-header middleware, sanitized request logging, the rate
//! limiter, the credential-capture side channel, the hook chain, and
//! finally (if no hook handled the request) reverse-proxying to the
//! upstream Subsonic server.

pub mod handlers;
pub mod hooks;
pub mod pending;
pub mod security;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::vault::Credential;

use hooks::HookOutcome;
use state::AppState;

const SANITIZED_LOG_CAP: usize = 512;
const UPSTREAM_TIMEOUT_SECS: u64 = 300;
const MAX_USERNAME_LEN: usize = 100;

/// Build the `reqwest::Client` used both for reverse-proxying and (shared)
/// for the vault/sync upstream calls.
pub fn build_client() -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
        .pool_max_idle_per_host(10)
        .http1_only()
        .build()
        .map_err(|e| AppError::network("client_build_failed", "failed to build upstream HTTP client").with_cause(e))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();

    layer = if config.cors.allow_origins.iter().any(|o| o == "*") {
        layer.allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .cors
            .allow_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    };

    let methods: Vec<Method> = config.cors.allow_methods.iter().filter_map(|m| m.parse().ok()).collect();
    layer = layer.allow_methods(methods);

    layer = if config.cors.allow_headers.iter().any(|h| h == "*") {
        layer.allow_headers(tower_http::cors::Any)
    } else {
        let headers: Vec<HeaderName> = config.cors.allow_headers.iter().filter_map(|h| h.parse().ok()).collect();
        layer.allow_headers(headers)
    };

    if config.cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    layer.max_age(Duration::from_secs(3600))
}

/// Build the router. Split out from `start_proxy` so integration tests can
/// build a router against an in-process `AppState` without binding a socket.
pub fn build_router(config: &AppConfig, state: AppState) -> Router {
    let mut router = Router::new().route("/*path", any(proxy_handler)).with_state(state.clone());

    if config.security.enabled {
        router = router.layer(axum::middleware::from_fn_with_state(
            state.config.clone(),
            security::security_headers_middleware,
        ));
    }

    if config.cors.enabled {
        router = router.layer(cors_layer(config));
    }

    // Outermost layer: a panicking hook or handler must not take the whole
    // process down with it, just the one request.
    router.layer(CatchPanicLayer::custom(handle_panic))
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %message, "hook or handler panicked");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Start the proxy server and run until `shutdown_rx` fires.
pub async fn start_proxy(
    config: Arc<AppConfig>,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), AppError> {
    let app = build_router(&config, state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::network("bind_failed", format!("failed to bind {}", bind_addr)).with_cause(e))?;

    tracing::info!(addr = %bind_addr, "proxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .map_err(|e| AppError::new(crate::error::ErrorCategory::Server, "server_error", "proxy server error").with_cause(e))?;

    tracing::info!("proxy server shut down gracefully");
    Ok(())
}

/// Strip bytes <32 or =127 and cap length, before a value is ever logged.
fn sanitize_for_log(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| (*c as u32) >= 32 && (*c as u32) != 127).collect();
    cleaned.chars().take(SANITIZED_LOG_CAP).collect()
}

/// Dispatch a captured credential to a bounded background validation task.
/// Never blocks the request path; excess captures are simply dropped (the
/// next request retries) once the semaphore is exhausted.
fn spawn_credential_capture(state: &AppState, uri: &Uri) {
    if !uri.path().starts_with("/rest/") {
        return;
    }
    let params = handlers::query_params(uri);
    let username = match params.get("u") {
        Some(u) if !u.is_empty() => u.chars().take(MAX_USERNAME_LEN).collect::<String>(),
        _ => return,
    };

    let credential = if let Some(password) = params.get("p") {
        Credential::Password(password.clone())
    } else if let (Some(token), Some(salt)) = (params.get("t"), params.get("s")) {
        Credential::Token { token: token.clone(), salt: salt.clone() }
    } else {
        return;
    };

    let Ok(permit) = state.credential_permits.clone().try_acquire_owned() else {
        tracing::debug!(user = %username, "credential worker pool exhausted, dropping capture");
        return;
    };

    let vault = state.vault.clone();
    let client = state.client.clone();
    let upstream_url = state.config.upstream_url.clone();
    let sync_trigger = state.sync_trigger.clone();

    tokio::spawn(async move {
        let _permit = permit;
        match vault.validate_and_store(&client, &upstream_url, &username, credential).await {
            Ok(true) => {
                tracing::info!(user = %username, "credential captured and validated");
                let _ = sync_trigger.try_send(());
            }
            Ok(false) => {
                tracing::debug!(user = %username, "credential rejected by upstream");
            }
            Err(e) => {
                tracing::warn!(user = %username, error = %e, "credential validation error");
            }
        }
    });
}

async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();

    tracing::info!(
        method = %method,
        path = %sanitize_for_log(uri.path()),
        "request"
    );

    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    spawn_credential_capture(&state, &uri);

    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    if let Some(hook) = state.hooks.get(uri.path()) {
        let mut builder = axum::http::Request::builder().method(method.clone()).uri(uri.clone());
        if let Some(map) = builder.headers_mut() {
            *map = headers.clone();
        }
        let parts = builder.body(()).expect("method/uri/headers always build a valid request").into_parts().0;

        match hook(state.clone(), parts, body.clone()).await {
            HookOutcome::Handled(response) => return response,
            HookOutcome::Defer => {}
        }
    }

    reverse_proxy(&state, method, uri, headers, body).await
}

/// Forward the request upstream unchanged, rewriting `Host` and setting
/// `X-Forwarded-Host`.
async fn reverse_proxy(
    state: &AppState,
    method: Method,
    uri: Uri,
    headers: axum::http::HeaderMap,
    body: bytes::Bytes,
) -> Response {
    let forward_url = format!(
        "{}{}",
        state.config.upstream_url,
        uri.path_and_query().map(|pq| pq.as_str()).unwrap_or(uri.path())
    );

    let forward_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let inbound_host = headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()).map(str::to_string);

    let mut builder = state.client.request(forward_method, &forward_url);
    for (key, value) in headers.iter() {
        if key == axum::http::header::HOST || key == "connection" || key == "transfer-encoding" {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_bytes().to_vec());
    }
    if let Some(host) = inbound_host {
        builder = builder.header("x-forwarded-host", host);
    }
    builder = builder.body(body.to_vec());

    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(url = %forward_url, error = %e, "upstream request failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = response.status().as_u16();
    let response_headers = response.headers().clone();
    let response_body = match response.bytes().await {
        Ok(b) => b,
        Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };

    let mut out = Response::builder().status(status);
    for (key, value) in response_headers.iter() {
        if key == "transfer-encoding" || key == "connection" {
            continue;
        }
        out = out.header(key.as_str(), value.as_bytes());
    }
    out.body(Body::from(response_body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_with_str_payload_becomes_500() {
        let err: Box<dyn std::any::Any + Send + 'static> = Box::new("boom");
        let response = handle_panic(err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn panic_with_unknown_payload_still_becomes_500() {
        let err: Box<dyn std::any::Any + Send + 'static> = Box::new(42i32);
        let response = handle_panic(err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
