//! Session-aware API client for the campus lost-and-found backend
//!
//! Every call goes through [`ApiClient`], which issues it over a cookie-store
//! transport and hands failures to the [`SessionCoordinator`]. An expired
//! session is renewed once, no matter how many requests hit the expiry at the
//! same time, and each affected request is replayed once afterwards. Callers
//! only see a JSON body or a classified [`ApiError`].
//!
//! Request lifecycle:
//! 1. `ApiClient::send` builds a `Fresh` [`PendingRequest`] and issues it
//! 2. 2xx → parsed body returned
//! 3. 401 `TOKEN_EXPIRED` → coordinator joins (or starts) the single renewal
//! 4. Renewal succeeds → request replayed once as `Replayed`, outcome is final
//! 5. Renewal fails → every queued request fails with the renewal error, one
//!    redirect-to-login is published
//! 6. Anything else → classified [`ApiError`], 401 revoked/invalid also redirects

pub mod classify;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod redirect;
pub mod request;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use classify::{ErrorPayload, FailureClassification, classify_status};
pub use client::{ApiClient, default_headers};
pub use config::{ClientConfig, HeaderInjection};
pub use coordinator::{CoordinatorConfig, RenewalState, SessionCoordinator};
pub use error::{ApiError, Failure};
pub use redirect::{
    LoginRedirect, NavigationChannel, NavigationEvent, RedirectReason, navigation_channel,
};
pub use request::{PendingRequest, RequestDescriptor};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
