//! Unified error handling system
//!
//! Two layers of errors live here. [`ApiError`] is the single error every
//! caller of the backend API receives, normalized from whatever the server
//! (or the network) produced. [`SentinelError`] covers local infrastructure
//! such as configuration, token persistence and logging, and carries an
//! [`ErrorContext`] for debugging and recovery hints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

pub type SentinelResult<T> = Result<T, SentinelError>;

/// Status used for failures where no HTTP response was ever received.
pub const NETWORK_FAILURE_STATUS: u16 = 0;

/// Category of an [`ApiError`], used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No access token and no refresh path available.
    AuthenticationMissing,
    /// A refresh was attempted and the backend rejected it.
    AuthenticationExpired,
    /// Non-2xx response carrying structured field errors.
    ValidationFailed,
    /// Non-2xx response without structured detail.
    RemoteFailure,
    /// The request never got a response.
    NetworkUnreachable,
    /// A response (or outgoing payload) did not have the expected shape.
    ContractViolation,
}

/// One backend field-validation failure: `loc` path plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: Vec<String>,
    pub message: String,
}

impl FieldError {
    /// Render as `"<path joined by '.'>: <message>"`.
    pub fn render(&self) -> String {
        format!("{}: {}", self.path.join("."), self.message)
    }
}

/// Normalized failure of a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status of the response, or [`NETWORK_FAILURE_STATUS`]
    pub status: u16,
    pub message: String,
    pub field_errors: Option<Vec<FieldError>>,
    pub kind: ErrorKind,
}

impl ApiError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            field_errors: None,
            kind,
        }
    }

    /// Build an error from a non-2xx response body.
    ///
    /// The body is parsed as JSON when possible. A `detail` list is treated
    /// as backend field validation (`[{"loc": [...], "msg": "..."}]`) and
    /// flattened into the message; a non-empty string `detail` is used
    /// verbatim. JSON without a usable `detail` becomes `HTTP <status>`;
    /// a body that is not JSON falls back to the raw text.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();

        match parsed.as_ref().and_then(|v| v.get("detail")) {
            Some(Value::Array(entries)) => {
                let field_errors: Vec<FieldError> =
                    entries.iter().map(field_error_from_entry).collect();
                let message = field_errors
                    .iter()
                    .map(FieldError::render)
                    .collect::<Vec<_>>()
                    .join(", ");

                Self {
                    status,
                    message,
                    field_errors: Some(field_errors),
                    kind: ErrorKind::ValidationFailed,
                }
            }
            Some(Value::String(detail)) if !detail.is_empty() => {
                Self::new(ErrorKind::RemoteFailure, status, detail.clone())
            }
            Some(Value::String(_)) | Some(Value::Null) => Self::status_line(status),
            Some(other) => Self::new(ErrorKind::RemoteFailure, status, other.to_string()),
            // JSON without a usable detail carries nothing worth showing
            None if parsed.is_some() || body.trim().is_empty() => Self::status_line(status),
            None => Self::new(ErrorKind::RemoteFailure, status, body.to_string()),
        }
    }

    fn status_line(status: u16) -> Self {
        Self::new(ErrorKind::RemoteFailure, status, format!("HTTP {}", status))
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NetworkUnreachable,
            NETWORK_FAILURE_STATUS,
            message,
        )
    }

    pub fn authentication_missing() -> Self {
        Self::new(
            ErrorKind::AuthenticationMissing,
            401,
            "Not authenticated: no access or refresh token available",
        )
    }

    pub fn contract_violation(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractViolation, status, message)
    }

    /// Reclassify a rejected refresh attempt, keeping status and message.
    pub fn into_expired(self) -> Self {
        match self.kind {
            ErrorKind::ValidationFailed | ErrorKind::RemoteFailure => Self {
                kind: ErrorKind::AuthenticationExpired,
                ..self
            },
            _ => self,
        }
    }

    pub fn is_network(&self) -> bool {
        self.kind == ErrorKind::NetworkUnreachable
    }

    pub fn is_authentication(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::AuthenticationMissing | ErrorKind::AuthenticationExpired
        )
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::contract_violation(
            NETWORK_FAILURE_STATUS,
            format!("Invalid request payload: {}", err),
        )
    }
}

fn field_error_from_entry(entry: &Value) -> FieldError {
    let path = entry
        .get("loc")
        .and_then(Value::as_array)
        .map(|loc| {
            loc.iter()
                .map(|part| match part {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let message = match entry.get("msg") {
        Some(Value::String(msg)) => msg.clone(),
        Some(other) => other.to_string(),
        None => entry.to_string(),
    };

    FieldError { path, message }
}

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Infrastructure error type for the Sentinel console
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Session storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Logging error: {message}")]
    Logging {
        message: String,
        context: ErrorContext,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SentinelError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SentinelError::Config { context, .. } => Some(context),
            SentinelError::Storage { context, .. } => Some(context),
            SentinelError::Logging { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            SentinelError::Api(api) => api.is_network(),
            SentinelError::Io(_) => true,
            _ => false,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            SentinelError::Config { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration error"
                );
            }
            SentinelError::Api(api) if api.is_network() => {
                warn!(
                    status = api.status,
                    error = %self,
                    "Backend unreachable (may be recoverable)"
                );
            }
            SentinelError::Api(api) => {
                warn!(
                    status = api.status,
                    kind = ?api.kind,
                    error = %self,
                    "Backend request failed"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::SentinelError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'sentinel config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::SentinelError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::SentinelError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check that the session file directory is writable"),
        }
    };
}
