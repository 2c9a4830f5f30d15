//! subsoxy binary entry point
//!
//! Wires together config validation, the credential vault, the song store,
//! the shuffle engine, the sync loop, and the proxy server, then waits for
//! SIGINT/SIGTERM and shuts everything down in order.

use std::sync::Arc;

use anyhow::Result;
use subsoxy::config::AppConfig;
use subsoxy::proxy::state::AppState;
use subsoxy::shuffle::ShuffleEngine;
use subsoxy::storage::Storage;
use subsoxy::vault::Vault;
use subsoxy::{cli, logging, proxy, startup, storage, sync};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    let config = match AppConfig::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("subsoxy: configuration error: {}", e);
            std::process::exit(1);
        }
    };

    logging::init(&config.log_level);
    startup::log_startup(&config);

    let storage = match Storage::new(&config.db_path, &config.pool) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let client = match proxy::build_client() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream HTTP client");
            std::process::exit(1);
        }
    };

    let vault = Arc::new(Vault::new());
    let shuffle = Arc::new(ShuffleEngine::new(storage.clone()));
    let hooks = proxy::hooks::build_hooks(config.debug_mode);

    let (sync_trigger_tx, sync_trigger_rx) = tokio::sync::mpsc::channel(1);
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel();

    let config = Arc::new(config);
    let state = AppState::new(
        client.clone(),
        config.clone(),
        vault.clone(),
        storage.clone(),
        shuffle.clone(),
        hooks,
        sync_trigger_tx,
    );

    startup::print_startup(&config);

    let sync_handle = tokio::spawn(sync::run_sync_loop(
        client,
        config.upstream_url.clone(),
        vault,
        storage.clone(),
        sync_trigger_rx,
        shutdown_tx.subscribe(),
    ));

    let health_handle = if config.pool.health_check {
        Some(tokio::spawn(storage::spawn_health_check_loop(storage.pool(), shutdown_tx.subscribe())))
    } else {
        None
    };

    let server_config = config.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = proxy::start_proxy(server_config, state, server_shutdown_rx).await {
            tracing::error!(error = %e, "proxy server exited with an error");
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, shutting down...");

    let _ = shutdown_tx.send(());
    let _ = server_shutdown_tx.send(());

    let _ = server_handle.await;
    let _ = sync_handle.await;
    if let Some(handle) = health_handle {
        let _ = handle.await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
