//! Failure taxonomy for backend responses
//!
//! Maps an HTTP status and the backend's application error code onto a
//! [`FailureClassification`]. Only 401 responses look at the code: the
//! backend distinguishes an expired session (recoverable by renewal) from a
//! revoked or invalid one (requires a fresh login).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Error code the backend sends when the session cookie has expired.
pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";

/// Error code the backend sends when the session was revoked server-side.
pub const TOKEN_REVOKED: &str = "TOKEN_REVOKED";

/// Error code the backend sends when the session cookie is malformed or unknown.
pub const INVALID_TOKEN: &str = "INVALID_TOKEN";

/// Classification of a failed request.
///
/// `CredentialExpired` is the only recoverable case; the coordinator renews
/// the session and replays the request. Everything else is surfaced to the
/// caller as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    CredentialExpired,
    CredentialInvalid,
    Forbidden,
    NotFound,
    RateLimited,
    ServerError,
    NetworkUnreachable,
    Unclassified,
}

impl FailureClassification {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureClassification::CredentialExpired => "credential_expired",
            FailureClassification::CredentialInvalid => "credential_invalid",
            FailureClassification::Forbidden => "forbidden",
            FailureClassification::NotFound => "not_found",
            FailureClassification::RateLimited => "rate_limited",
            FailureClassification::ServerError => "server_error",
            FailureClassification::NetworkUnreachable => "network_unreachable",
            FailureClassification::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error body returned by the backend: `{ "error": "...", "code": "..." }`.
///
/// Fields are read independently: a field of the wrong type is dropped
/// without losing the other, and the rest of the body is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorPayload {
    /// Parse an error payload from a response body. Returns `None` when the
    /// body is not a JSON object.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let value = serde_json::from_slice::<Value>(body).ok()?;
        let object = value.as_object()?;
        let field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_owned);
        Some(Self {
            error: field("error"),
            code: field("code"),
        })
    }
}

/// Classify a 401 response by its application error code.
///
/// Unknown or missing codes are `Unclassified`: the backend did not say
/// whether the session is recoverable, so neither renewal nor a login
/// redirect is triggered.
pub fn classify_401(code: Option<&str>) -> FailureClassification {
    match code {
        Some(TOKEN_EXPIRED) => FailureClassification::CredentialExpired,
        Some(TOKEN_REVOKED) | Some(INVALID_TOKEN) => FailureClassification::CredentialInvalid,
        _ => FailureClassification::Unclassified,
    }
}

/// Classify a failed response by HTTP status and application error code.
pub fn classify_status(status: u16, code: Option<&str>) -> FailureClassification {
    match status {
        401 => classify_401(code),
        403 => FailureClassification::Forbidden,
        404 => FailureClassification::NotFound,
        429 => FailureClassification::RateLimited,
        500..=599 => FailureClassification::ServerError,
        _ => FailureClassification::Unclassified,
    }
}
