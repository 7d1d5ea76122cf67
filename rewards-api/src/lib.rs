//! HTTP read/write surface over reconstructed delegation state: a public
//! router (read-only, rate-limited by the caller's reverse proxy) and an
//! optional private router (force-fetch triggers) bound to a second
//! listener.

mod metrics;
mod private;
mod public;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use rewards_chain::ChainAccess;
use rewards_scheduler::Scheduler;
use rewards_store::Store;
use tokio_util::sync::CancellationToken;

pub use metrics::ApiMetrics;

#[derive(Clone)]
pub struct ApiState {
    pub chain: Arc<dyn ChainAccess>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<Store>,
    pub metrics: Arc<ApiMetrics>,
    pub cancel: CancellationToken,
}

/// `GET /delegate/{cycle}/{address}`, `/available`, `/statistics/{cycle}`,
/// `/v1/rewards/split/{address}/{cycle}`, plus `/health` and `/metrics`.
pub fn public_router(state: ApiState) -> Router {
    Router::new()
        .route("/delegate/:cycle/:address", get(public::get_delegation_state))
        .route(
            "/delegate/:cycle/:address/available",
            get(public::get_delegation_state_available),
        )
        .route("/statistics/:cycle", get(public::get_statistics))
        .route(
            "/v1/rewards/split/:address/:cycle",
            get(public::get_rewards_split),
        )
        .route("/health", get(public::health))
        .route("/metrics", get(public::metrics))
        .with_state(state)
}

/// `GET /cycle/{cycle}?force=`, `/delegate/{cycle}/{address}?force=`.
/// Callers bind this to a listener separate from [`public_router`]'s.
pub fn private_router(state: ApiState) -> Router {
    Router::new()
        .route("/cycle/:cycle", get(private::fetch_cycle))
        .route("/delegate/:cycle/:address", get(private::fetch_delegate))
        .with_state(state)
}
