//! Error types surfaced to application code

use serde::Serialize;

use crate::classify::{ErrorPayload, FailureClassification, classify_status};
use crate::transport::{TransportError, TransportResponse};

/// Terminal failure of a request, in the uniform shape the UI consumes.
///
/// `status` is `None` when no response was received at all (connection
/// failure or timeout). `message` comes from the backend's error payload when
/// there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{classification}: {message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
    pub classification: FailureClassification,
}

impl ApiError {
    pub fn new(
        status: Option<u16>,
        message: impl Into<String>,
        classification: FailureClassification,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            classification,
        }
    }

    /// Error handed to queued requests when the task driving a renewal was
    /// dropped before the renewal settled.
    pub fn renewal_abandoned() -> Self {
        Self::new(
            None,
            "session renewal abandoned before completion",
            FailureClassification::Unclassified,
        )
    }

    /// Error for a request that could not be built (bad header, unencodable body).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(None, message, FailureClassification::Unclassified)
    }
}

/// A failed attempt, as observed by the pipeline before classification.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The backend answered with a non-2xx status.
    Response {
        status: u16,
        payload: Option<ErrorPayload>,
        body: String,
    },
    /// No response was received.
    Transport(TransportError),
}

impl Failure {
    /// Build a failure from a non-2xx transport response.
    pub fn from_response(response: &TransportResponse) -> Self {
        Failure::Response {
            status: response.status,
            payload: ErrorPayload::parse(&response.body),
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Failure::Response { status, .. } => Some(*status),
            Failure::Transport(_) => None,
        }
    }

    /// Application error code from the backend payload, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Failure::Response { payload, .. } => payload.as_ref()?.code.as_deref(),
            Failure::Transport(_) => None,
        }
    }

    pub fn classification(&self) -> FailureClassification {
        match self {
            Failure::Response { status, .. } => classify_status(*status, self.code()),
            Failure::Transport(_) => FailureClassification::NetworkUnreachable,
        }
    }
}

impl From<Failure> for ApiError {
    fn from(failure: Failure) -> Self {
        let classification = failure.classification();
        match failure {
            Failure::Response {
                status,
                payload,
                body,
            } => {
                let message = payload
                    .and_then(|p| p.error)
                    .filter(|m| !m.trim().is_empty())
                    .or_else(|| {
                        let trimmed = body.trim();
                        (!trimmed.is_empty()).then(|| trimmed.to_string())
                    })
                    .unwrap_or_else(|| reason_phrase(status));
                ApiError::new(Some(status), message, classification)
            }
            Failure::Transport(e) => ApiError::new(None, e.to_string(), classification),
        }
    }
}

fn reason_phrase(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}
