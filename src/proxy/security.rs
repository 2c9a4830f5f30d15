//! Security response headers and development-mode detection

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::config::AppConfig;

const LOCALHOST_HOSTS: [&str; 4] = ["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// A request's `Host` (or remote addr) matches a localhost pattern, or the
/// proxy is bound to its default port, or dev mode is explicitly configured.
pub fn is_dev_mode(config: &AppConfig, host: Option<&str>) -> bool {
    if config.security.dev_mode {
        return true;
    }
    if config.port == crate::cli::DEFAULT_PORT {
        return true;
    }
    match host {
        Some(h) => {
            let bare = h.split(':').next().unwrap_or(h);
            LOCALHOST_HOSTS.contains(&bare)
        }
        None => false,
    }
}

/// Apply security headers to every response, relaxed under dev-mode detection.
pub async fn security_headers_middleware(
    axum::extract::State(config): axum::extract::State<std::sync::Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    if !config.security.enabled {
        return next.run(req).await;
    }

    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let dev_mode = is_dev_mode(&config, host.as_deref());

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "x-frame-options",
        HeaderValue::from_static(if dev_mode { "SAMEORIGIN" } else { "DENY" }),
    );
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(if dev_mode {
            "default-src 'self' 'unsafe-inline' 'unsafe-eval' http: https: ws: wss:"
        } else {
            "default-src 'self'; script-src 'none'; object-src 'none'"
        }),
    );
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    if !dev_mode {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }

    response
}
