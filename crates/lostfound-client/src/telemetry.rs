//! Client-side metrics
//!
//! Emitted through the `metrics` facade. The library installs no recorder;
//! the embedding application decides whether and how to export them.
//!
//! - `api_client_requests_total` (counter): labels `method`, `status`
//! - `api_client_request_duration_seconds` (histogram): label `status`
//! - `api_client_renewals_total` (counter): label `outcome`
//! - `api_client_replays_total` (counter)
//! - `api_client_failures_total` (counter): label `classification`
//! - `api_client_login_redirects_total` (counter): label `reason`

use crate::classify::FailureClassification;
use crate::redirect::RedirectReason;

/// Outcome of one session renewal call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    Success,
    Failure,
    Abandoned,
}

impl RenewalOutcome {
    fn label(&self) -> &'static str {
        match self {
            RenewalOutcome::Success => "success",
            RenewalOutcome::Failure => "failure",
            RenewalOutcome::Abandoned => "abandoned",
        }
    }
}

/// Record a completed pipeline request. `status` is `None` when no response arrived.
pub fn record_request(method: &str, status: Option<u16>, duration_secs: f64) {
    let status_str = status.map_or_else(|| "none".to_string(), |s| s.to_string());
    metrics::counter!("api_client_requests_total", "method" => method.to_string(), "status" => status_str.clone())
        .increment(1);
    metrics::histogram!("api_client_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

pub fn record_renewal(outcome: RenewalOutcome) {
    metrics::counter!("api_client_renewals_total", "outcome" => outcome.label()).increment(1);
}

pub fn record_replay() {
    metrics::counter!("api_client_replays_total").increment(1);
}

/// Record a terminal failure surfaced to the caller.
pub fn record_failure(classification: FailureClassification) {
    metrics::counter!("api_client_failures_total", "classification" => classification.label())
        .increment(1);
}

pub fn record_login_redirect(reason: RedirectReason) {
    metrics::counter!("api_client_login_redirects_total", "reason" => reason.label()).increment(1);
}
