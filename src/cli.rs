// CLI module - command-line argument parsing
//
// Every flag doubles as an environment variable via clap's `env` attribute,
// giving flag > env > default precedence for free. Semantic validation
// (port range, burst >= rps, ...) is not done here - see
// `config::AppConfig::from_cli`, which turns an invalid `Cli` into a
// categorized `AppError::config(...)` and aborts startup.

use clap::Parser;

/// Default proxy bind port. Also used by the security-header middleware's
/// development-mode detection.
pub const DEFAULT_PORT: u16 = 4742;

/// Multi-tenant reverse proxy for Subsonic-dialect music servers
#[derive(Parser, Debug, Clone)]
#[command(name = "subsoxy")]
#[command(version, about = "Multi-tenant reverse proxy for Subsonic-dialect music servers", long_about = None)]
pub struct Cli {
    /// Port the proxy listens on (1-65535)
    #[arg(long, env = "SUBSOXY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Upstream Subsonic server base URL
    #[arg(long, env = "SUBSOXY_UPSTREAM_URL", default_value = "http://localhost:4533")]
    pub upstream_url: String,

    /// Log level: debug, info, warn, error
    #[arg(long, env = "SUBSOXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Path to the embedded database file (parent directories auto-created)
    #[arg(long, env = "SUBSOXY_DB_PATH", default_value = "./data/subsoxy.db")]
    pub db_path: String,

    /// Rate limit, requests per second (>=1)
    #[arg(long, env = "SUBSOXY_RATE_LIMIT_RPS", default_value_t = 10)]
    pub rate_limit_rps: u32,

    /// Rate limit burst size (>= rate_limit_rps)
    #[arg(long, env = "SUBSOXY_RATE_LIMIT_BURST", default_value_t = 20)]
    pub rate_limit_burst: u32,

    /// Enable the rate limiter
    #[arg(long, env = "SUBSOXY_RATE_LIMIT_ENABLED", default_value_t = true)]
    pub rate_limit_enabled: bool,

    /// Max open DB connections (>=1)
    #[arg(long, env = "SUBSOXY_DB_MAX_OPEN", default_value_t = 10)]
    pub db_max_open: u32,

    /// Max idle DB connections (<= max_open)
    #[arg(long, env = "SUBSOXY_DB_MAX_IDLE", default_value_t = 5)]
    pub db_max_idle: u32,

    /// Max connection lifetime, seconds (0 = unlimited)
    #[arg(long, env = "SUBSOXY_DB_CONN_MAX_LIFETIME_SECS", default_value_t = 3600)]
    pub db_conn_max_lifetime_secs: u64,

    /// Max connection idle time, seconds (0 = unlimited)
    #[arg(long, env = "SUBSOXY_DB_CONN_MAX_IDLE_TIME_SECS", default_value_t = 600)]
    pub db_conn_max_idle_time_secs: u64,

    /// Enable the pool health-check loop
    #[arg(long, env = "SUBSOXY_DB_HEALTH_CHECK", default_value_t = true)]
    pub db_health_check: bool,

    /// Max concurrent credential-validation background tasks (>=1)
    #[arg(long, env = "SUBSOXY_CREDENTIAL_WORKER_CAP", default_value_t = 100)]
    pub credential_worker_cap: usize,

    /// Enable CORS handling
    #[arg(long, env = "SUBSOXY_CORS_ENABLED", default_value_t = false)]
    pub cors_enabled: bool,

    /// Comma-separated list of allowed origins, or "*"
    #[arg(long, env = "SUBSOXY_CORS_ALLOW_ORIGINS", default_value = "")]
    pub cors_allow_origins: String,

    /// Comma-separated list of allowed methods
    #[arg(long, env = "SUBSOXY_CORS_ALLOW_METHODS", default_value = "GET,POST,OPTIONS")]
    pub cors_allow_methods: String,

    /// Comma-separated list of allowed headers, or "*"
    #[arg(long, env = "SUBSOXY_CORS_ALLOW_HEADERS", default_value = "*")]
    pub cors_allow_headers: String,

    /// Send Access-Control-Allow-Credentials: true
    #[arg(long, env = "SUBSOXY_CORS_ALLOW_CREDENTIALS", default_value_t = false)]
    pub cors_allow_credentials: bool,

    /// Enable the security-headers middleware
    #[arg(long, env = "SUBSOXY_SECURITY_HEADERS_ENABLED", default_value_t = true)]
    pub security_headers_enabled: bool,

    /// Force development-mode header relaxation
    #[arg(long, env = "SUBSOXY_DEV_MODE", default_value_t = false)]
    pub dev_mode: bool,

    /// Enable the /debug weight-inspection view
    #[arg(long, env = "SUBSOXY_DEBUG_MODE", default_value_t = false)]
    pub debug_mode: bool,
}

/// Parse argv + environment into a `Cli`, exiting the process on `--help`/`--version`
/// or a malformed argument, matching clap's default behavior.
pub fn parse() -> Cli {
    Cli::parse()
}
