pub mod deliveries;
pub mod dispatch;
pub mod health;

use axum::{middleware::from_fn, Router};

use crate::middleware::request_id::request_id;
use crate::state::AppState;

/// Every route, with request ids assigned before any guard runs.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(dispatch::router(state.clone()))
        .merge(deliveries::router(state))
        .layer(from_fn(request_id))
}
