//! Startup banner and module status log
//!
//! Prints a short banner before the proxy starts serving, then emits the
//! same information through `tracing` so it lands in whatever log sink the
//! operator configured.

use crate::config::AppConfig;

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Module loading status for display
struct ModuleStatus {
    name: &'static str,
    enabled: bool,
    description: &'static str,
}

fn module_status(config: &AppConfig) -> Vec<ModuleStatus> {
    vec![
        ModuleStatus { name: "proxy", enabled: true, description: "Request interception" },
        ModuleStatus { name: "storage", enabled: true, description: "Song/event/transition store" },
        ModuleStatus { name: "shuffle", enabled: true, description: "Weighted recommendation" },
        ModuleStatus { name: "sync", enabled: true, description: "Library discovery loop" },
        ModuleStatus {
            name: "rate-limit",
            enabled: config.rate_limit.enabled,
            description: "Token-bucket request throttling",
        },
        ModuleStatus { name: "cors", enabled: config.cors.enabled, description: "Cross-origin envelope" },
        ModuleStatus {
            name: "security-headers",
            enabled: config.security.enabled,
            description: "Response header hardening",
        },
        ModuleStatus { name: "debug-view", enabled: config.debug_mode, description: "Per-user weight inspector" },
    ]
}

/// Print the startup banner to stdout, before the server starts accepting connections.
pub fn print_startup(config: &AppConfig) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}subsoxy{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Multi-tenant reverse proxy for Subsonic-dialect music servers{RESET}");
    println!();
    println!("  {DIM}Upstream:{RESET} {}", config.upstream_url);
    println!("  {DIM}Database:{RESET} {}", config.db_path);
    println!();
    println!("  {DIM}Loading modules...{RESET}");
    for module in module_status(config) {
        print_module_status(&module);
    }
    println!();
    println!("  {GREEN}▸{RESET} Proxy listening on {BOLD}0.0.0.0:{}{RESET}", config.port);
    if config.security.dev_mode {
        println!("  {YELLOW}▸{RESET} {YELLOW}Development mode{RESET} {DIM}(relaxed headers){RESET}");
    }
    println!();
}

fn print_module_status(module: &ModuleStatus) {
    use colors::*;
    let (icon, style) = if module.enabled { (format!("{GREEN}✓{RESET}"), "") } else { (format!("{DIM}○{RESET}"), DIM) };
    println!("    {icon} {style}{:<16}{RESET} {DIM}{}{RESET}", module.name, module.description);
}

/// Emit the same startup information through `tracing`, for log-file consumers.
pub fn log_startup(config: &AppConfig) {
    tracing::info!("subsoxy v{} starting", VERSION);
    tracing::info!(upstream = %config.upstream_url, db_path = %config.db_path, port = config.port, "configuration loaded");
    for module in module_status(config) {
        tracing::info!(module = module.name, enabled = module.enabled, "{}", module.description);
    }
    tracing::info!("ready");
}
