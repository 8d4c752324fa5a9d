//! Scripted in-memory backend for unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::watch;

use crate::coordinator::DEFAULT_RENEWAL_PATH;
use crate::error::Failure;
use crate::request::RequestDescriptor;
use crate::transport::{Transport, TransportError, TransportResponse};

pub const EXPIRED_BODY: &str = r#"{"error":"Session expired","code":"TOKEN_EXPIRED"}"#;

pub fn failure(status: u16, body: &'static str) -> Failure {
    Failure::from_response(&TransportResponse {
        status,
        body: Bytes::from_static(body.as_bytes()),
    })
}

pub fn expired() -> Failure {
    failure(401, EXPIRED_BODY)
}

/// Holds renewal calls until opened (or dropped).
pub struct RenewalGate {
    tx: watch::Sender<bool>,
}

impl RenewalGate {
    pub fn open(&self) {
        let _ = self.tx.send(true);
    }
}

/// Backend with a single session flag.
///
/// While the session is expired every route answers 401 `TOKEN_EXPIRED`;
/// once valid, routes echo the request back. The renewal endpoint validates
/// the session unless told to fail or to leave it expired.
#[derive(Default)]
pub struct MockBackend {
    session_valid: AtomicBool,
    stay_expired: AtomicBool,
    renewal_failure: Mutex<Option<(u16, String)>>,
    renewal_gate: Mutex<Option<watch::Receiver<bool>>>,
    fixed: Mutex<HashMap<String, (u16, String)>>,
    unreachable: Mutex<Vec<String>>,
    calls: Mutex<Vec<RequestDescriptor>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_session_valid(&self, valid: bool) {
        self.session_valid.store(valid, Ordering::SeqCst);
    }

    /// Renewal answers 200 but the session stays expired.
    pub fn stay_expired(&self) {
        self.stay_expired.store(true, Ordering::SeqCst);
    }

    pub fn fail_renewal(&self, status: u16, body: &str) {
        *self.renewal_failure.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn gate_renewal(&self) -> RenewalGate {
        let (tx, rx) = watch::channel(false);
        *self.renewal_gate.lock().unwrap() = Some(rx);
        RenewalGate { tx }
    }

    /// Always answer `route` with this status and body.
    pub fn respond(&self, route: &str, status: u16, body: &str) {
        self.fixed
            .lock()
            .unwrap()
            .insert(route.to_string(), (status, body.to_string()));
    }

    pub fn unreachable(&self, route: &str) {
        self.unreachable.lock().unwrap().push(route.to_string());
    }

    pub fn recorded(&self, route: &str) -> Vec<RequestDescriptor> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.route() == route)
            .cloned()
            .collect()
    }

    pub fn calls_to(&self, route: &str) -> usize {
        self.recorded(route).len()
    }

    pub fn renewal_calls(&self) -> usize {
        self.calls_to(DEFAULT_RENEWAL_PATH)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn answer(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
        let route = request.route().to_string();
        if self.unreachable.lock().unwrap().contains(&route) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        if let Some((status, body)) = self.fixed.lock().unwrap().get(&route).cloned() {
            return Ok(response(status, body));
        }

        if route == DEFAULT_RENEWAL_PATH {
            let gate = self.renewal_gate.lock().unwrap().clone();
            if let Some(mut gate) = gate {
                let _ = gate.wait_for(|open| *open).await;
            }
            if let Some((status, body)) = self.renewal_failure.lock().unwrap().clone() {
                return Ok(response(status, body));
            }
            if !self.stay_expired.load(Ordering::SeqCst) {
                self.set_session_valid(true);
            }
            return Ok(response(204, String::new()));
        }

        if !self.session_valid.load(Ordering::SeqCst) {
            return Ok(response(401, EXPIRED_BODY.to_string()));
        }

        let headers: serde_json::Map<String, serde_json::Value> = request
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();
        let echo = serde_json::json!({
            "method": request.method.as_str(),
            "path": request.path,
            "body": request.body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()),
            "headers": headers,
        });
        Ok(response(200, echo.to_string()))
    }
}

fn response(status: u16, body: String) -> TransportResponse {
    TransportResponse {
        status,
        body: Bytes::from(body),
    }
}

impl Transport for MockBackend {
    fn execute<'a>(
        &'a self,
        request: &'a RequestDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>> {
        self.calls.lock().unwrap().push(request.clone());
        Box::pin(self.answer(request))
    }
}
