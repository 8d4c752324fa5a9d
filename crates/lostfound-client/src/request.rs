//! Request descriptors
//!
//! A [`RequestDescriptor`] holds everything needed to issue a call verbatim:
//! method, path, encoded body, and the final header set. It is built once by
//! the pipeline and shared (via `Arc`) between the first attempt and any
//! replay, so the replay cannot drift from the original.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;
use uuid::Uuid;

/// Immutable description of one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
    pub headers: HeaderMap,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Bytes>, headers: HeaderMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            body,
            headers,
        }
    }

    /// Path without its query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// Whether this request hits the endpoint at `path`. The transport drops
    /// the leading slash when joining onto the base URL, so `auth/refresh`
    /// and `/auth/refresh/` reach the same endpoint as `/auth/refresh`.
    pub fn targets(&self, path: &str) -> bool {
        normalize_route(&self.path) == normalize_route(path)
    }
}

/// Strip the query string and any leading or trailing slashes.
fn normalize_route(path: &str) -> &str {
    path.split('?').next().unwrap_or(path).trim_matches('/')
}

/// A request as tracked by the pipeline and coordinator.
///
/// The replay marker is the variant itself: a `Fresh` request may be replayed
/// once after session renewal, a `Replayed` one never again.
#[derive(Debug, Clone)]
pub enum PendingRequest {
    Fresh(Arc<RequestDescriptor>),
    Replayed { original: Arc<RequestDescriptor> },
}

impl PendingRequest {
    pub fn fresh(descriptor: RequestDescriptor) -> Self {
        PendingRequest::Fresh(Arc::new(descriptor))
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        match self {
            PendingRequest::Fresh(d) => d,
            PendingRequest::Replayed { original } => original,
        }
    }

    pub fn is_replayed(&self) -> bool {
        matches!(self, PendingRequest::Replayed { .. })
    }

    /// The replay descriptor for this request, or `None` if it has already
    /// been replayed once.
    pub fn replay(&self) -> Option<PendingRequest> {
        match self {
            PendingRequest::Fresh(d) => Some(PendingRequest::Replayed {
                original: Arc::clone(d),
            }),
            PendingRequest::Replayed { .. } => None,
        }
    }
}
