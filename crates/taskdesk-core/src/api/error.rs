use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;

/// Category of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Missing, rejected, or unrenewable credentials
    Unauthenticated,
    /// Timeouts, throttling, and generic server errors; worth retrying
    TransientNetwork,
    /// Request or payload rejected; never retried
    Validation,
    /// The server cannot be reached or is down
    ServerUnavailable,
}

impl ApiErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, ApiErrorKind::TransientNetwork)
    }

    /// Maps an unsuccessful HTTP status to its category.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => ApiErrorKind::Unauthenticated,
            502 | 503 => ApiErrorKind::ServerUnavailable,
            408 | 429 => ApiErrorKind::TransientNetwork,
            s if s >= 500 => ApiErrorKind::TransientNetwork,
            _ => ApiErrorKind::Validation,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::Unauthenticated => write!(f, "unauthenticated"),
            ApiErrorKind::TransientNetwork => write!(f, "transient-network"),
            ApiErrorKind::Validation => write!(f, "validation"),
            ApiErrorKind::ServerUnavailable => write!(f, "server-unavailable"),
        }
    }
}

/// Structured error from the taskdesk API.
///
/// `Clone` so one failure can be handed to every waiter of a shared request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// HTTP status, when the server answered
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unauthenticated, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Validation, message)
    }

    /// Builds an error from a non-success response body.
    ///
    /// The message comes from the body's `msg` or `error` field when present.
    pub fn http_status(status: StatusCode, body: &str) -> Self {
        let message = server_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string)
        });
        Self {
            kind: ApiErrorKind::from_status(status),
            message,
            status: Some(status.as_u16()),
        }
    }

    /// Classifies a transport-level failure.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(
                ApiErrorKind::TransientNetwork,
                format!("Request timed out: {e}"),
            )
        } else if e.is_connect() {
            Self::new(
                ApiErrorKind::ServerUnavailable,
                format!("Connection failed: {e}"),
            )
        } else if e.is_decode() {
            Self::new(ApiErrorKind::Validation, format!("Invalid response: {e}"))
        } else if let Some(status) = e.status() {
            Self::http_status(status, "")
        } else {
            Self::new(
                ApiErrorKind::TransientNetwork,
                format!("Network error: {e}"),
            )
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.kind == ApiErrorKind::Unauthenticated
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

/// Result type for API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

fn server_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    ["msg", "error", "message"]
        .iter()
        .find_map(|field| json.get(field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|msg| !msg.is_empty())
        .map(str::to_string)
}
