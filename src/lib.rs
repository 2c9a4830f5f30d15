//! subsoxy - multi-tenant reverse proxy for Subsonic-dialect music servers
//!
//! `main.rs` is a thin binary wrapper around this library so that
//! integration tests (`tests/`) can build an `AppState` and a router
//! against a mocked upstream without going through a real process.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod shuffle;
pub mod startup;
pub mod storage;
pub mod subsonic;
pub mod sync;
pub mod vault;
