//! Unified logging system
//!
//! Structured `tracing` output with a configurable format and destination.

use crate::error::{ErrorContext, SentinelError, SentinelResult};
use serde::{Deserialize, Serialize};
use std::io;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Whether to include file and line information
    pub include_location: bool,
    /// Whether to include thread information
    pub include_thread: bool,
    /// Whether to log to file
    pub log_to_file: bool,
    /// Log file path (if log_to_file is true)
    pub log_file_path: Option<String>,
    /// Custom filter directives
    pub filter_directives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            include_thread: false,
            log_to_file: false,
            log_file_path: None,
            filter_directives: vec![
                "sentinel=info".to_string(),
                "sentinel_client=info".to_string(),
            ],
        }
    }
}

impl LoggingConfig {
    /// Raise every sentinel target to debug
    pub fn verbose(mut self) -> Self {
        self.level = "debug".to_string();
        self.filter_directives = vec![
            "sentinel=debug".to_string(),
            "sentinel_core=debug".to_string(),
            "sentinel_client=debug".to_string(),
        ];
        self
    }
}

/// Initialize the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> SentinelResult<()> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for directive in &config.filter_directives {
        let directive = directive.parse().map_err(|e| SentinelError::Logging {
            message: format!("Invalid filter directive '{}': {}", directive, e),
            context: ErrorContext::new("logging").with_operation("parse_directive"),
        })?;
        filter = filter.add_directive(directive);
    }

    let writer = match (config.log_to_file, &config.log_file_path) {
        (true, Some(path)) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            fmt::writer::BoxMakeWriter::new(std::sync::Arc::new(file))
        }
        (true, None) => {
            return Err(SentinelError::Logging {
                message: "log_file_path must be specified when log_to_file is true".to_string(),
                context: ErrorContext::new("logging").with_operation("init"),
            })
        }
        (false, _) => fmt::writer::BoxMakeWriter::new(io::stderr),
    };

    let base = fmt::layer()
        .with_writer(writer)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread)
        .with_thread_names(config.include_thread);

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry.with(base.json()).try_init(),
        LogFormat::Pretty => registry.with(base.pretty()).try_init(),
        LogFormat::Compact => registry.with(base.compact()).try_init(),
    };

    result.map_err(|e| SentinelError::Logging {
        message: format!("Failed to install subscriber: {}", e),
        context: ErrorContext::new("logging").with_operation("init"),
    })
}

#[macro_export]
macro_rules! log_operation_start {
    ($operation:expr) => {
        $crate::tracing::debug!(
            operation = $operation,
            "Starting operation"
        );
    };
    ($operation:expr, $($field:tt)*) => {
        $crate::tracing::debug!(
            operation = $operation,
            $($field)*,
            "Starting operation"
        );
    };
}

#[macro_export]
macro_rules! log_operation_error {
    ($operation:expr, $error:expr) => {
        $crate::tracing::warn!(
            operation = $operation,
            error = %$error,
            "Operation failed"
        );
    };
    ($operation:expr, $error:expr, $($field:tt)*) => {
        $crate::tracing::warn!(
            operation = $operation,
            error = %$error,
            $($field)*,
            "Operation failed"
        );
    };
}
