//! Effective application configuration
//!
//! [`AppConfig::from_cli`] is the single place where a parsed [`crate::cli::Cli`]
//! is turned into validated, typed settings. Every boundary check (port range,
//! burst >= rps, idle <= max_open, non-empty CORS origins when enabled,
//! CORS methods drawn from the known HTTP verb set, ...) lives here, so
//! startup fails fast with one categorized [`crate::error::AppError::config`]
//! instead of panicking deep inside a runtime component.

use std::time::Duration;

use crate::cli::Cli;
use crate::error::AppError;

/// Rate limiter settings (governor token bucket)
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

/// Connection pool tuning for the embedded database
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_open: u32,
    pub max_idle: u32,
    pub conn_max_lifetime: Duration,
    pub conn_max_idle_time: Duration,
    pub health_check: bool,
}

/// CORS envelope settings
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
}

/// Security response-header settings
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub dev_mode: bool,
}

/// Fully validated application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub upstream_url: String,
    pub log_level: String,
    pub db_path: String,
    pub rate_limit: RateLimitConfig,
    pub pool: PoolConfig,
    pub credential_worker_cap: usize,
    pub cors: CorsConfig,
    pub security: SecurityConfig,
    pub debug_mode: bool,
}

impl AppConfig {
    /// Validate a parsed CLI and turn it into an `AppConfig`. Every failure
    /// is a `ErrorCategory::Config` error; callers should log it and exit(1).
    pub fn from_cli(cli: Cli) -> Result<Self, AppError> {
        if cli.port == 0 {
            return Err(AppError::config("invalid_port", "port must be between 1 and 65535"));
        }

        let upstream_url = url_or_err(&cli.upstream_url)?;

        let log_level = cli.log_level.to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&log_level.as_str()) {
            return Err(AppError::config(
                "invalid_log_level",
                format!("unknown log level '{}', expected trace|debug|info|warn|error", cli.log_level),
            ));
        }

        if cli.rate_limit_enabled {
            if cli.rate_limit_rps == 0 {
                return Err(AppError::config("invalid_rate_limit", "rate_limit_rps must be >= 1"));
            }
            if cli.rate_limit_burst < cli.rate_limit_rps {
                return Err(AppError::config(
                    "invalid_rate_limit",
                    "rate_limit_burst must be >= rate_limit_rps",
                ));
            }
        }

        if cli.db_max_open == 0 {
            return Err(AppError::config("invalid_pool", "db_max_open must be >= 1"));
        }
        if cli.db_max_idle > cli.db_max_open {
            return Err(AppError::config("invalid_pool", "db_max_idle must be <= db_max_open"));
        }

        if cli.credential_worker_cap == 0 {
            return Err(AppError::config(
                "invalid_worker_cap",
                "credential_worker_cap must be >= 1",
            ));
        }

        let allow_origins: Vec<String> = cli
            .cors_allow_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if cli.cors_enabled && allow_origins.is_empty() {
            return Err(AppError::config(
                "invalid_cors",
                "cors_allow_origins must be non-empty when CORS is enabled",
            ));
        }
        const VALID_CORS_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "OPTIONS", "HEAD", "PATCH"];
        let allow_methods: Vec<String> = cli
            .cors_allow_methods
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = allow_methods.iter().find(|m| !VALID_CORS_METHODS.contains(&m.as_str())) {
            return Err(AppError::config(
                "invalid_cors",
                format!("cors_allow_methods contains unsupported method '{}', expected one of {:?}", bad, VALID_CORS_METHODS),
            ));
        }
        let allow_headers = cli
            .cors_allow_headers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(AppConfig {
            port: cli.port,
            upstream_url,
            log_level,
            db_path: cli.db_path,
            rate_limit: RateLimitConfig {
                enabled: cli.rate_limit_enabled,
                requests_per_second: cli.rate_limit_rps,
                burst: cli.rate_limit_burst,
            },
            pool: PoolConfig {
                max_open: cli.db_max_open,
                max_idle: cli.db_max_idle,
                conn_max_lifetime: Duration::from_secs(cli.db_conn_max_lifetime_secs),
                conn_max_idle_time: Duration::from_secs(cli.db_conn_max_idle_time_secs),
                health_check: cli.db_health_check,
            },
            credential_worker_cap: cli.credential_worker_cap,
            cors: CorsConfig {
                enabled: cli.cors_enabled,
                allow_origins,
                allow_methods,
                allow_headers,
                allow_credentials: cli.cors_allow_credentials,
            },
            security: SecurityConfig {
                enabled: cli.security_headers_enabled,
                dev_mode: cli.dev_mode || cli.port == crate::cli::DEFAULT_PORT,
            },
            debug_mode: cli.debug_mode,
        })
    }
}

fn url_or_err(raw: &str) -> Result<String, AppError> {
    let parsed = reqwest::Url::parse(raw).map_err(|e| {
        AppError::config("invalid_upstream_url", format!("upstream_url '{}' is not a valid URL", raw)).with_cause(e)
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::config(
            "invalid_upstream_url",
            format!("upstream_url scheme must be http or https, got '{}'", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(AppError::config("invalid_upstream_url", "upstream_url must include a host"));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            port: 4742,
            upstream_url: "http://localhost:4533".into(),
            log_level: "info".into(),
            db_path: "./data/subsoxy.db".into(),
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            rate_limit_enabled: true,
            db_max_open: 10,
            db_max_idle: 5,
            db_conn_max_lifetime_secs: 3600,
            db_conn_max_idle_time_secs: 600,
            db_health_check: true,
            credential_worker_cap: 100,
            cors_enabled: false,
            cors_allow_origins: "".into(),
            cors_allow_methods: "GET,POST,OPTIONS".into(),
            cors_allow_headers: "*".into(),
            cors_allow_credentials: false,
            security_headers_enabled: true,
            dev_mode: false,
            debug_mode: false,
        }
    }

    #[test]
    fn rejects_burst_below_rps() {
        let mut cli = base_cli();
        cli.rate_limit_burst = 1;
        cli.rate_limit_rps = 10;
        assert!(AppConfig::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_cors_enabled_without_origins() {
        let mut cli = base_cli();
        cli.cors_enabled = true;
        assert!(AppConfig::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_max_idle_above_max_open() {
        let mut cli = base_cli();
        cli.db_max_idle = 50;
        cli.db_max_open = 10;
        assert!(AppConfig::from_cli(cli).is_err());
    }

    #[test]
    fn accepts_valid_config() {
        let cfg = AppConfig::from_cli(base_cli()).unwrap();
        assert_eq!(cfg.port, 4742);
        assert!(cfg.rate_limit.enabled);
    }

    #[test]
    fn rejects_non_http_scheme() {
        let mut cli = base_cli();
        cli.upstream_url = "ftp://example.com".into();
        assert!(AppConfig::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_unsupported_cors_method() {
        let mut cli = base_cli();
        cli.cors_allow_methods = "GET,TRACE".into();
        assert!(AppConfig::from_cli(cli).is_err());
    }

    #[test]
    fn accepts_every_supported_cors_method() {
        let mut cli = base_cli();
        cli.cors_allow_methods = "GET,POST,PUT,DELETE,OPTIONS,HEAD,PATCH".into();
        assert!(AppConfig::from_cli(cli).is_ok());
    }
}
