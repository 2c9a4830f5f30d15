//! Proxy shared state
//!
//! One [`AppState`] is built at startup and cloned into every request
//! handler via axum's `State` extractor. Everything it holds is either
//! immutable after construction (hooks map, config, rate limiter) or
//! internally synchronized (vault, shuffle engine, storage pool), so no
//! additional locking is needed at this layer.

use std::collections::HashMap;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::proxy::hooks::Hook;
use crate::proxy::pending::PendingSongs;
use crate::shuffle::ShuffleEngine;
use crate::storage::Storage;
use crate::vault::Vault;

pub type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared state threaded through every request handler.
#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub config: Arc<AppConfig>,
    pub vault: Arc<Vault>,
    pub storage: Arc<Storage>,
    pub shuffle: Arc<ShuffleEngine>,
    /// Built once at startup (§9 "hooks map populated once, read-only during serving").
    pub hooks: Arc<HashMap<&'static str, Hook>>,
    pub rate_limiter: Option<Arc<GovernorLimiter>>,
    /// Bounds the number of concurrently-running credential-validation tasks.
    pub credential_permits: Arc<Semaphore>,
    pub pending: Arc<PendingSongs>,
    /// Triggers an immediate sync pass when a credential capture turns out to be new.
    pub sync_trigger: tokio::sync::mpsc::Sender<()>,
}

impl AppState {
    pub fn new(
        client: reqwest::Client,
        config: Arc<AppConfig>,
        vault: Arc<Vault>,
        storage: Arc<Storage>,
        shuffle: Arc<ShuffleEngine>,
        hooks: HashMap<&'static str, Hook>,
        sync_trigger: tokio::sync::mpsc::Sender<()>,
    ) -> Self {
        let rate_limiter = if config.rate_limit.enabled {
            let quota = Quota::per_second(
                std::num::NonZeroU32::new(config.rate_limit.requests_per_second)
                    .expect("validated rate_limit_rps >= 1"),
            )
            .allow_burst(
                std::num::NonZeroU32::new(config.rate_limit.burst).expect("validated rate_limit_burst >= 1"),
            );
            Some(Arc::new(RateLimiter::direct(quota)))
        } else {
            None
        };

        let credential_permits = Arc::new(Semaphore::new(config.credential_worker_cap));

        Self {
            client,
            config,
            vault,
            storage,
            shuffle,
            hooks: Arc::new(hooks),
            rate_limiter,
            credential_permits,
            pending: Arc::new(PendingSongs::new()),
            sync_trigger,
        }
    }
}
