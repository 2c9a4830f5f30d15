//! Shared integration-test scaffolding: spins up a real subsoxy proxy on an
//! ephemeral port, in front of either a `wiremock::MockServer` or a raw
//! upstream URL, and returns a ready-to-hit base URL plus the state handles
//! tests need to assert on afterward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use subsoxy::config::{AppConfig, CorsConfig, PoolConfig, RateLimitConfig, SecurityConfig};
use subsoxy::proxy;
use subsoxy::proxy::state::AppState;
use subsoxy::shuffle::ShuffleEngine;
use subsoxy::storage::Storage;
use subsoxy::vault::Vault;

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_db_path() -> String {
    let n = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("subsoxy-test-{}-{}.db", std::process::id(), n))
        .to_string_lossy()
        .into_owned()
}

pub fn test_config(upstream_url: &str) -> AppConfig {
    AppConfig {
        port: 0,
        upstream_url: upstream_url.trim_end_matches('/').to_string(),
        log_level: "warn".into(),
        db_path: unique_db_path(),
        rate_limit: RateLimitConfig { enabled: false, requests_per_second: 10, burst: 20 },
        pool: PoolConfig {
            max_open: 5,
            max_idle: 1,
            conn_max_lifetime: std::time::Duration::from_secs(3600),
            conn_max_idle_time: std::time::Duration::from_secs(600),
            health_check: false,
        },
        credential_worker_cap: 10,
        cors: CorsConfig {
            enabled: false,
            allow_origins: vec![],
            allow_methods: vec![],
            allow_headers: vec![],
            allow_credentials: false,
        },
        security: SecurityConfig { enabled: true, dev_mode: true },
        debug_mode: true,
    }
}

pub struct TestApp {
    pub base_url: String,
    pub state: AppState,
    pub client: reqwest::Client,
}

/// Build an `AppState` against `upstream_url`, bind it to an ephemeral port,
/// and run the server in the background for the test's duration.
pub async fn spawn_app(upstream_url: &str) -> TestApp {
    let config = Arc::new(test_config(upstream_url));
    let storage = Arc::new(Storage::new(&config.db_path, &config.pool).expect("open test db"));
    let shuffle = Arc::new(ShuffleEngine::new(storage.clone()));
    let vault = Arc::new(Vault::new());
    let hooks = proxy::hooks::build_hooks(config.debug_mode);
    let client = proxy::build_client().expect("build test client");
    let (sync_trigger_tx, _sync_trigger_rx) = tokio::sync::mpsc::channel(1);

    let state = AppState::new(
        client.clone(),
        config.clone(),
        vault,
        storage,
        shuffle,
        hooks,
        sync_trigger_tx,
    );

    let router = proxy::build_router(&config, state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    TestApp { base_url: format!("http://{}", addr), state, client }
}
