//! Redirect-to-login side channel
//!
//! The coordinator never navigates itself; it reports that the session is
//! unrecoverable through a [`LoginRedirect`] and the UI layer decides what to
//! do. [`NavigationChannel`] turns each report into a [`NavigationEvent`] on
//! an unbounded mpsc channel.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Why the session can no longer be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectReason {
    /// The backend rejected the session as revoked or invalid.
    CredentialRejected,
    /// The single renewal attempt failed.
    RenewalFailed,
    /// The backend refused access (only when configured to redirect on 403).
    Forbidden,
}

impl RedirectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RedirectReason::CredentialRejected => "credential_rejected",
            RedirectReason::RenewalFailed => "renewal_failed",
            RedirectReason::Forbidden => "forbidden",
        }
    }
}

/// Observable navigation request emitted toward the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationEvent {
    pub target: String,
    pub reason: RedirectReason,
}

/// Receiver of redirect-to-login requests.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, reason: RedirectReason);
}

/// [`LoginRedirect`] that publishes [`NavigationEvent`]s on a channel.
#[derive(Debug, Clone)]
pub struct NavigationChannel {
    login_path: String,
    tx: mpsc::UnboundedSender<NavigationEvent>,
}

/// Create a navigation channel targeting `login_path`.
pub fn navigation_channel(
    login_path: impl Into<String>,
) -> (NavigationChannel, mpsc::UnboundedReceiver<NavigationEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        NavigationChannel {
            login_path: login_path.into(),
            tx,
        },
        rx,
    )
}

impl LoginRedirect for NavigationChannel {
    fn redirect_to_login(&self, reason: RedirectReason) {
        crate::telemetry::record_login_redirect(reason);
        info!(target_path = %self.login_path, reason = reason.label(), "redirecting to login");
        let event = NavigationEvent {
            target: self.login_path.clone(),
            reason,
        };
        if self.tx.send(event).is_err() {
            debug!("navigation receiver dropped, redirect not delivered");
        }
    }
}
