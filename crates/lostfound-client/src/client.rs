//! Request pipeline
//!
//! Single entry point for outbound calls. Builds the request descriptor once
//! (default headers merged, body encoded), issues it through the transport,
//! and hands any failure to the [`SessionCoordinator`] before the caller sees
//! it. Callers only ever get a JSON body or an [`ApiError`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument, warn};

use crate::config::{ClientConfig, HeaderInjection};
use crate::coordinator::{CoordinatorConfig, SessionCoordinator};
use crate::error::{ApiError, Failure};
use crate::redirect::LoginRedirect;
use crate::request::{PendingRequest, RequestDescriptor};
use crate::telemetry;
use crate::transport::{HttpTransport, Transport};

/// Build the default header set from configured injections.
///
/// Invalid names or values are skipped with a warning. `Cookie` is never
/// injected: the session cookie belongs to the transport's cookie store.
pub fn default_headers(injections: &[HeaderInjection]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == COOKIE {
            warn!(header = %injection.name, "refusing to inject cookie header, session is cookie-store managed");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
    headers
}

/// Session-aware API client.
///
/// Cheap to clone; clones share the transport, and more importantly the
/// coordinator, so single-flight renewal spans all of them.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    coordinator: Arc<SessionCoordinator>,
    default_headers: HeaderMap,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: Arc<SessionCoordinator>,
        default_headers: HeaderMap,
    ) -> Self {
        Self {
            transport,
            coordinator,
            default_headers,
        }
    }

    /// Build the reqwest transport, coordinator and pipeline from configuration.
    pub fn from_config(config: &ClientConfig, redirect: Arc<dyn LoginRedirect>) -> common::Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(
            config.client.base_url.clone(),
            Duration::from_secs(config.client.timeout_secs),
        )
        .map_err(|e| common::Error::Config(e.to_string()))?;
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let headers = default_headers(&config.headers);

        let coordinator = SessionCoordinator::new(
            transport.clone(),
            redirect,
            CoordinatorConfig {
                renewal_path: config.client.renewal_path.clone(),
                renewal_timeout: config.client.renewal_timeout_secs.map(Duration::from_secs),
                renewal_headers: headers.clone(),
                redirect_on_forbidden: config.client.redirect_on_forbidden,
            },
        );

        Ok(Self::new(transport, Arc::new(coordinator), headers))
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Issue a request and return the parsed response body.
    ///
    /// `headers` override the defaults name by name, keeping every value the
    /// caller set; a caller `Cookie` is dropped. A JSON `body` sets
    /// `content-type: application/json` unless the caller set one.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        headers: Option<HeaderMap>,
    ) -> Result<serde_json::Value, ApiError> {
        let descriptor = self.build(method, path, body, headers)?;
        self.execute(PendingRequest::fresh(descriptor)).await
    }

    pub async fn get(&self, path: &str) -> Result<serde_json::Value, ApiError> {
        self.send(Method::GET, path, None, None).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        self.send(Method::POST, path, Some(body), None).await
    }

    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        self.send(Method::PUT, path, Some(body), None).await
    }

    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        self.send(Method::PATCH, path, Some(body), None).await
    }

    pub async fn delete(&self, path: &str) -> Result<serde_json::Value, ApiError> {
        self.send(Method::DELETE, path, None, None).await
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        headers: Option<HeaderMap>,
    ) -> Result<RequestDescriptor, ApiError> {
        let mut merged = self.default_headers.clone();
        if let Some(extra) = headers {
            for name in extra.keys() {
                if name == COOKIE {
                    warn!(header = name.as_str(), "ignoring caller cookie header, session is cookie-store managed");
                    continue;
                }
                merged.remove(name);
                for value in extra.get_all(name) {
                    merged.append(name.clone(), value.clone());
                }
            }
        }

        let body = match body {
            Some(value) => {
                let encoded = serde_json::to_vec(value)
                    .map_err(|e| ApiError::invalid_request(format!("failed to encode body: {e}")))?;
                if !merged.contains_key(CONTENT_TYPE) {
                    merged.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Some(Bytes::from(encoded))
            }
            None => None,
        };

        Ok(RequestDescriptor::new(method, path, body, merged))
    }

    #[instrument(
        skip_all,
        fields(
            request_id = %request.descriptor().id,
            method = %request.descriptor().method,
            path = %request.descriptor().path,
        )
    )]
    async fn execute(&self, request: PendingRequest) -> Result<serde_json::Value, ApiError> {
        let descriptor = request.descriptor();
        if cfg!(debug_assertions) {
            debug!("sending request");
        }

        let started = Instant::now();
        let attempt = self.transport.execute(descriptor).await;
        let status = attempt.as_ref().ok().map(|r| r.status);
        telemetry::record_request(
            descriptor.method.as_str(),
            status,
            started.elapsed().as_secs_f64(),
        );

        let failure = match attempt {
            Ok(response) if response.is_success() => {
                if cfg!(debug_assertions) {
                    debug!(status = response.status, "request succeeded");
                }
                return Ok(response.json());
            }
            Ok(response) => Failure::from_response(&response),
            Err(e) => Failure::Transport(e),
        };
        self.coordinator.handle(request, failure).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureClassification;
    use crate::redirect::{NavigationEvent, RedirectReason, navigation_channel};
    use crate::testing::MockBackend;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn client(backend: &Arc<MockBackend>) -> (ApiClient, UnboundedReceiver<NavigationEvent>) {
        let (redirect, rx) = navigation_channel("/login");
        let transport: Arc<dyn Transport> = backend.clone();
        let coordinator = SessionCoordinator::new(
            transport.clone(),
            Arc::new(redirect),
            CoordinatorConfig::default(),
        );
        let headers = default_headers(&[HeaderInjection {
            name: "x-client".into(),
            value: "lostfound-web".into(),
        }]);
        (ApiClient::new(transport, Arc::new(coordinator), headers), rx)
    }

    fn redirects(rx: &mut UnboundedReceiver<NavigationEvent>) -> Vec<NavigationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Spawn `paths.len()` GETs and wait until all but the leader are queued
    /// behind the renewal.
    async fn spawn_expired_burst(
        client: &ApiClient,
        paths: &[&'static str],
    ) -> Vec<tokio::task::JoinHandle<Result<serde_json::Value, ApiError>>> {
        let handles: Vec<_> = paths
            .iter()
            .map(|&path| {
                let client = client.clone();
                tokio::spawn(async move { client.get(path).await })
            })
            .collect();
        while client.coordinator().queued() < paths.len() - 1 {
            tokio::task::yield_now().await;
        }
        handles
    }

    #[test]
    fn default_headers_skip_invalid_and_cookie() {
        let headers = default_headers(&[
            HeaderInjection {
                name: "invalid header name".into(),
                value: "v".into(),
            },
            HeaderInjection {
                name: "cookie".into(),
                value: "session=stolen".into(),
            },
            HeaderInjection {
                name: "x-bad-value".into(),
                value: "line\nbreak".into(),
            },
            HeaderInjection {
                name: "x-client".into(),
                value: "lostfound-web".into(),
            },
        ]);

        assert!(headers.get("cookie").is_none());
        assert!(headers.get("x-bad-value").is_none());
        assert_eq!(headers.get("x-client").unwrap(), "lostfound-web");
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn from_config_rejects_invalid_config_as_config_error() {
        let mut config: ClientConfig = toml::from_str(
            r#"
[client]
base_url = "http://127.0.0.1:8080"
"#,
        )
        .unwrap();
        let (redirect, _rx) = navigation_channel("/login");
        let redirect: Arc<dyn LoginRedirect> = Arc::new(redirect);

        assert!(ApiClient::from_config(&config, redirect.clone()).is_ok());

        config.client.base_url = "ftp://lostfound.example".into();
        let err = ApiClient::from_config(&config, redirect).err().unwrap();
        assert!(matches!(err, common::Error::Config(_)), "{err}");
    }

    #[tokio::test]
    async fn success_returns_parsed_body_without_coordinator() {
        let backend = MockBackend::new();
        backend.set_session_valid(true);
        let (client, mut rx) = client(&backend);

        let body = client.get("/items?status=found").await.unwrap();

        assert_eq!(body["method"], "GET");
        assert_eq!(body["path"], "/items?status=found");
        assert_eq!(body["headers"]["x-client"], "lostfound-web");
        assert_eq!(backend.renewal_calls(), 0);
        assert!(redirects(&mut rx).is_empty());
    }

    #[test]
    fn caller_headers_keep_every_value_and_never_set_cookie() {
        let backend = MockBackend::new();
        let (client, _rx) = client(&backend);

        let mut extra = HeaderMap::new();
        extra.append("x-client", HeaderValue::from_static("admin-console"));
        extra.append("x-trace", HeaderValue::from_static("a"));
        extra.append("x-trace", HeaderValue::from_static("b"));
        extra.insert(COOKIE, HeaderValue::from_static("session=forged"));

        let descriptor = client.build(Method::GET, "/items", None, Some(extra)).unwrap();

        let traces: Vec<_> = descriptor.headers.get_all("x-trace").iter().collect();
        assert_eq!(traces, ["a", "b"]);
        let clients: Vec<_> = descriptor.headers.get_all("x-client").iter().collect();
        assert_eq!(clients, ["admin-console"], "caller value replaces the default");
        assert!(descriptor.headers.get(COOKIE).is_none());
        assert_eq!(descriptor.headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn caller_headers_override_defaults_and_json_sets_content_type() {
        let backend = MockBackend::new();
        backend.set_session_valid(true);
        let (client, _rx) = client(&backend);

        let mut extra = HeaderMap::new();
        extra.insert("x-client", HeaderValue::from_static("admin-console"));
        let body = client
            .send(
                Method::POST,
                "/items",
                Some(&serde_json::json!({"title": "Umbrella"})),
                Some(extra),
            )
            .await
            .unwrap();

        assert_eq!(body["headers"]["x-client"], "admin-console");
        assert_eq!(body["headers"]["content-type"], "application/json");
        assert_eq!(body["body"], r#"{"title":"Umbrella"}"#);
    }

    #[tokio::test]
    async fn concurrent_expiry_triggers_exactly_one_renewal() {
        let backend = MockBackend::new();
        let gate = backend.gate_renewal();
        let (client, mut rx) = client(&backend);

        let handles = spawn_expired_burst(&client, &["/items/a", "/items/b", "/items/c"]).await;
        assert!(client.coordinator().renewal_in_progress());
        gate.open();

        for (handle, path) in handles.into_iter().zip(["/items/a", "/items/b", "/items/c"]) {
            let body = handle.await.unwrap().unwrap();
            assert_eq!(body["path"], path);
        }

        assert_eq!(backend.renewal_calls(), 1, "single-flight renewal");
        for path in ["/items/a", "/items/b", "/items/c"] {
            assert_eq!(backend.calls_to(path), 2, "{path}: original attempt + one replay");
        }
        assert!(!client.coordinator().renewal_in_progress());
        assert_eq!(client.coordinator().queued(), 0);
        assert!(redirects(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn late_arrival_during_renewal_queues_instead_of_renewing() {
        let backend = MockBackend::new();
        let gate = backend.gate_renewal();
        let (client, _rx) = client(&backend);

        let mut handles = spawn_expired_burst(&client, &["/items/a", "/items/b"]).await;

        // C fails while the renewal is still outstanding.
        let late = {
            let client = client.clone();
            tokio::spawn(async move { client.get("/items/c").await })
        };
        while client.coordinator().queued() < 2 {
            tokio::task::yield_now().await;
        }
        handles.push(late);
        gate.open();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(backend.renewal_calls(), 1);
    }

    #[tokio::test]
    async fn replay_is_byte_identical_to_original() {
        let backend = MockBackend::new();
        let (client, _rx) = client(&backend);

        let mut extra = HeaderMap::new();
        extra.insert("x-request-source", HeaderValue::from_static("claim-form"));
        client
            .send(
                Method::POST,
                "/items/42/claims",
                Some(&serde_json::json!({"note": "blue backpack, initials J.D."})),
                Some(extra),
            )
            .await
            .unwrap();

        let calls = backend.recorded("/items/42/claims");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, calls[1].method);
        assert_eq!(calls[0].path, calls[1].path);
        assert_eq!(calls[0].body, calls[1].body);
        assert_eq!(calls[0].headers, calls[1].headers);
        assert_eq!(calls[0].id, calls[1].id, "replay reuses the original descriptor");
    }

    #[tokio::test]
    async fn second_expiry_after_renewal_is_fatal() {
        let backend = MockBackend::new();
        backend.stay_expired();
        let (client, mut rx) = client(&backend);

        let err = client.get("/items").await.unwrap_err();

        assert_eq!(err.status, Some(401));
        assert_eq!(err.classification, FailureClassification::CredentialExpired);
        assert_eq!(backend.renewal_calls(), 1, "no second renewal");
        assert_eq!(backend.calls_to("/items"), 2);
        assert!(redirects(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn renewal_failure_fans_out_to_all_waiters_with_one_redirect() {
        let backend = MockBackend::new();
        let gate = backend.gate_renewal();
        backend.fail_renewal(401, r#"{"error":"Refresh rejected","code":"TOKEN_REVOKED"}"#);
        let (client, mut rx) = client(&backend);

        let paths = ["/items/a", "/items/b", "/items/c", "/items/d"];
        let handles = spawn_expired_burst(&client, &paths).await;
        gate.open();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.status, Some(401));
            assert_eq!(err.message, "Refresh rejected");
            assert_eq!(err.classification, FailureClassification::CredentialInvalid);
        }

        assert_eq!(backend.renewal_calls(), 1);
        for path in paths {
            assert_eq!(backend.calls_to(path), 1, "{path} must not be replayed");
        }
        let events = redirects(&mut rx);
        assert_eq!(events.len(), 1, "redirect fires once per renewal failure");
        assert_eq!(events[0].reason, RedirectReason::RenewalFailed);
    }

    #[tokio::test]
    async fn revoked_session_skips_renewal() {
        let backend = MockBackend::new();
        backend.respond(
            "/items",
            401,
            r#"{"error":"Session revoked","code":"TOKEN_REVOKED"}"#,
        );
        let (client, mut rx) = client(&backend);

        let err = client.get("/items").await.unwrap_err();

        assert_eq!(err.classification, FailureClassification::CredentialInvalid);
        assert_eq!(backend.renewal_calls(), 0);
        let events = redirects(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, RedirectReason::CredentialRejected);
    }

    #[tokio::test]
    async fn direct_call_to_renewal_endpoint_is_not_renewed() {
        let backend = MockBackend::new();
        backend.respond(
            "/auth/refresh",
            401,
            r#"{"error":"Session expired","code":"TOKEN_EXPIRED"}"#,
        );
        let (client, _rx) = client(&backend);

        let err = client
            .send(Method::POST, "/auth/refresh", None, None)
            .await
            .unwrap_err();

        assert_eq!(err.classification, FailureClassification::CredentialExpired);
        assert_eq!(backend.renewal_calls(), 1, "only the caller's own call");
    }

    #[tokio::test]
    async fn unreachable_backend_is_classified() {
        let backend = MockBackend::new();
        backend.unreachable("/items");
        let (client, mut rx) = client(&backend);

        let err = client.get("/items").await.unwrap_err();

        assert_eq!(err.status, None);
        assert_eq!(err.classification, FailureClassification::NetworkUnreachable);
        assert!(err.message.contains("connection refused"), "got: {}", err.message);
        assert_eq!(backend.renewal_calls(), 0);
        assert!(redirects(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn replay_transport_failure_surfaces_as_network_unreachable() {
        let backend = MockBackend::new();
        backend.unreachable("/claims");
        let (client, _rx) = client(&backend);

        // The renewal succeeds but the replay cannot connect.
        let request = PendingRequest::fresh(RequestDescriptor::new(
            Method::GET,
            "/claims",
            None,
            HeaderMap::new(),
        ));
        let err = client
            .coordinator()
            .handle(request, crate::testing::expired())
            .await
            .unwrap_err();

        assert_eq!(err.classification, FailureClassification::NetworkUnreachable);
        assert_eq!(backend.renewal_calls(), 1);
        assert_eq!(backend.calls_to("/claims"), 1);
    }
}
