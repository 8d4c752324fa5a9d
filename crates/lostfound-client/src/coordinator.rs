//! Session renewal coordinator
//!
//! Receives every failed attempt from the pipeline and decides whether it is
//! terminal or recoverable by renewing the session. Renewal is single-flight:
//! the first expired request issues the one renewal call, every other expired
//! request that arrives while it is outstanding is queued and resumed when it
//! settles.
//!
//! Per-request flow:
//! - Issued → Classifying → Fatal | RenewalCandidate
//! - RenewalCandidate → WaitingOnRenewal | Renewing → Replaying → Resolved | Fatal
//!
//! A replayed request is never renewed again. If the replay fails with an
//! expired session the backend is inconsistent and the failure is surfaced.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Method;
use reqwest::header::HeaderMap;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::classify::FailureClassification;
use crate::error::{ApiError, Failure};
use crate::redirect::{LoginRedirect, RedirectReason};
use crate::request::{PendingRequest, RequestDescriptor};
use crate::telemetry::{self, RenewalOutcome};
use crate::transport::Transport;

/// Default renewal endpoint.
pub const DEFAULT_RENEWAL_PATH: &str = "/auth/refresh";

type Waiter = oneshot::Sender<Result<(), ApiError>>;

/// Single-flight bookkeeping.
///
/// `in_progress` is true iff a renewal call is outstanding; `waiters` is only
/// non-empty while it is.
#[derive(Debug, Default)]
pub struct RenewalState {
    in_progress: bool,
    waiters: Vec<Waiter>,
}

/// What a renewal candidate has to do after joining the state.
enum Join {
    /// Issue the renewal call.
    Lead,
    /// Wait for the outstanding renewal to settle.
    Wait(oneshot::Receiver<Result<(), ApiError>>),
}

impl RenewalState {
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn queued(&self) -> usize {
        self.waiters.len()
    }

    fn join(&mut self) -> Join {
        if self.in_progress {
            let (tx, rx) = oneshot::channel();
            self.waiters.push(tx);
            Join::Wait(rx)
        } else {
            self.in_progress = true;
            Join::Lead
        }
    }

    /// End the outstanding renewal, handing back the waiters in enqueue order.
    fn settle(&mut self) -> Vec<Waiter> {
        self.in_progress = false;
        std::mem::take(&mut self.waiters)
    }
}

/// Settles the renewal state when the leading task finishes or is dropped.
///
/// If the future driving the renewal is cancelled, waiters are rejected with
/// [`ApiError::renewal_abandoned`] instead of hanging.
struct LeaderGuard<'a> {
    state: &'a Mutex<RenewalState>,
    settled: bool,
}

impl<'a> LeaderGuard<'a> {
    fn new(state: &'a Mutex<RenewalState>) -> Self {
        Self {
            state,
            settled: false,
        }
    }

    fn settle(mut self, outcome: &Result<(), ApiError>) {
        self.settled = true;
        let waiters = lock(self.state).settle();
        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "renewal settled, releasing waiters");
        for waiter in waiters {
            // A dropped receiver means that caller went away; nothing to do.
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = lock(self.state).settle();
        warn!(waiters = waiters.len(), "renewal abandoned before completion");
        telemetry::record_renewal(RenewalOutcome::Abandoned);
        for waiter in waiters {
            let _ = waiter.send(Err(ApiError::renewal_abandoned()));
        }
    }
}

fn lock(state: &Mutex<RenewalState>) -> MutexGuard<'_, RenewalState> {
    // The state is plain data updated in single statements; a panic elsewhere
    // cannot leave it half-written.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Path of the renewal endpoint. Requests to it are never renewal candidates.
    pub renewal_path: String,
    /// Extra bound on the renewal call. `None` relies on the transport timeout.
    pub renewal_timeout: Option<Duration>,
    /// Headers sent with the renewal call.
    pub renewal_headers: HeaderMap,
    /// Also redirect to login on 403 responses.
    pub redirect_on_forbidden: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            renewal_path: DEFAULT_RENEWAL_PATH.to_string(),
            renewal_timeout: None,
            renewal_headers: HeaderMap::new(),
            redirect_on_forbidden: false,
        }
    }
}

/// Single-flight session renewal and replay.
pub struct SessionCoordinator {
    transport: Arc<dyn Transport>,
    redirect: Arc<dyn LoginRedirect>,
    state: Mutex<RenewalState>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        redirect: Arc<dyn LoginRedirect>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            transport,
            redirect,
            state: Mutex::new(RenewalState::default()),
            config,
        }
    }

    pub fn renewal_path(&self) -> &str {
        &self.config.renewal_path
    }

    /// Whether a renewal call is currently outstanding.
    pub fn renewal_in_progress(&self) -> bool {
        lock(&self.state).in_progress()
    }

    /// Number of requests queued behind the outstanding renewal.
    pub fn queued(&self) -> usize {
        lock(&self.state).queued()
    }

    /// Resolve a failed attempt.
    ///
    /// Returns the replayed response body if the failure was an expired
    /// session and renewal succeeded; otherwise the classified error.
    #[instrument(
        skip_all,
        fields(
            request_id = %request.descriptor().id,
            method = %request.descriptor().method,
            path = %request.descriptor().path,
        )
    )]
    pub async fn handle(
        &self,
        request: PendingRequest,
        failure: Failure,
    ) -> Result<serde_json::Value, ApiError> {
        let replay = match request.replay() {
            Some(replay) if self.is_renewal_candidate(request.descriptor(), &failure) => replay,
            _ => return Err(self.fatal(&request, failure)),
        };

        debug!("session expired, renewal required");
        self.await_renewal().await?;
        self.replay(replay).await
    }

    /// Expired session on anything but the renewal endpoint. Whether the
    /// request is still fresh is checked by the caller.
    fn is_renewal_candidate(&self, descriptor: &RequestDescriptor, failure: &Failure) -> bool {
        failure.classification() == FailureClassification::CredentialExpired
            && !descriptor.targets(&self.config.renewal_path)
    }

    /// Terminal failure: classify, apply side effects, hand back the error.
    fn fatal(&self, request: &PendingRequest, failure: Failure) -> ApiError {
        let error = ApiError::from(failure);
        let replayed = request.is_replayed();
        match error.classification {
            FailureClassification::CredentialInvalid => {
                warn!(replayed, status = ?error.status, "session rejected");
                self.redirect.redirect_to_login(RedirectReason::CredentialRejected);
            }
            FailureClassification::Forbidden if self.config.redirect_on_forbidden => {
                warn!(replayed, "access forbidden, redirecting to login");
                self.redirect.redirect_to_login(RedirectReason::Forbidden);
            }
            FailureClassification::CredentialExpired => {
                warn!(
                    replayed,
                    renewal_endpoint = request.descriptor().targets(&self.config.renewal_path),
                    "session expired and cannot be renewed for this request"
                );
            }
            FailureClassification::NetworkUnreachable => {
                warn!(replayed, error = %error.message, "backend unreachable");
            }
            FailureClassification::RateLimited | FailureClassification::ServerError => {
                warn!(replayed, status = ?error.status, error = %error.message, "backend error");
            }
            _ => {
                debug!(replayed, status = ?error.status, classification = %error.classification, "request failed");
            }
        }
        telemetry::record_failure(error.classification);
        error
    }

    /// Join the single-flight renewal: lead it or wait for it.
    async fn await_renewal(&self) -> Result<(), ApiError> {
        let join = lock(&self.state).join();
        match join {
            Join::Wait(rx) => {
                debug!("renewal already in flight, queued");
                let outcome = rx.await.unwrap_or_else(|_| Err(ApiError::renewal_abandoned()));
                // The leader counts its own failure in renew().
                if let Err(e) = &outcome {
                    telemetry::record_failure(e.classification);
                }
                outcome
            }
            Join::Lead => {
                let guard = LeaderGuard::new(&self.state);
                let outcome = self.renew().await;
                guard.settle(&outcome);
                if outcome.is_err() {
                    // Only the leader redirects; waiters share its outcome.
                    self.redirect.redirect_to_login(RedirectReason::RenewalFailed);
                }
                outcome
            }
        }
    }

    /// Issue the one renewal call.
    async fn renew(&self) -> Result<(), ApiError> {
        let descriptor = RequestDescriptor::new(
            Method::POST,
            self.config.renewal_path.clone(),
            None,
            self.config.renewal_headers.clone(),
        );
        info!(renewal_id = %descriptor.id, path = %descriptor.path, "renewing session");

        let attempt = self.transport.execute(&descriptor);
        let result = match self.config.renewal_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(crate::transport::TransportError::Timeout(format!(
                    "session renewal exceeded {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => attempt.await,
        };

        let outcome = match result {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(ApiError::from(Failure::from_response(&response))),
            Err(e) => Err(ApiError::from(Failure::Transport(e))),
        };

        match &outcome {
            Ok(()) => {
                info!("session renewed");
                telemetry::record_renewal(RenewalOutcome::Success);
            }
            Err(e) => {
                warn!(status = ?e.status, classification = %e.classification, error = %e.message, "session renewal failed");
                telemetry::record_renewal(RenewalOutcome::Failure);
                telemetry::record_failure(e.classification);
            }
        }
        outcome
    }

    /// Re-issue the original descriptor once. The outcome is terminal.
    async fn replay(&self, request: PendingRequest) -> Result<serde_json::Value, ApiError> {
        debug!("replaying request after renewal");
        telemetry::record_replay();
        match self.transport.execute(request.descriptor()).await {
            Ok(response) if response.is_success() => Ok(response.json()),
            Ok(response) => Err(self.fatal(&request, Failure::from_response(&response))),
            Err(e) => Err(self.fatal(&request, Failure::Transport(e))),
        }
    }
}
