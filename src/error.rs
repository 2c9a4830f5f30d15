//! Categorized application error type
//!
//! Every error that crosses a component boundary is wrapped in [`AppError`],
//! which carries a category, a short machine-readable code, a human message,
//! an optional cause, and a free-form context map. This lets callers decide
//! propagation policy (abort startup, log-and-drop, 400, 429, ...) by
//! matching on `category` without parsing message strings.

use std::collections::HashMap;
use std::fmt;

/// Broad classification of where an error originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Database,
    Credentials,
    Server,
    Network,
    Validation,
    Auth,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Database => "database",
            ErrorCategory::Credentials => "credentials",
            ErrorCategory::Server => "server",
            ErrorCategory::Network => "network",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Auth => "auth",
        };
        write!(f, "{}", s)
    }
}

/// A categorized application error with context
#[derive(Debug)]
pub struct AppError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub context: HashMap<String, String>,
}

impl AppError {
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            cause: None,
            context: HashMap::new(),
        }
    }

    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, code, message)
    }

    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Database, code, message)
    }

    pub fn credentials(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Credentials, code, message)
    }

    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Network, code, message)
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, code, message)
    }

    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, code, message)
    }

    /// Attach a cause (wrapped error)
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach a context key/value, chainable
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.category, self.code, self.message)?;
        if !self.context.is_empty() {
            write!(f, " (")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", k, v)?;
            }
            write!(f, ")")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::database("sqlite_error", e.to_string())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::database("pool_error", e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::network("http_error", e.to_string())
    }
}
