use axum::{
    extract::{Query, State},
    middleware::from_fn_with_state,
    routing::post,
    Extension, Json, Router,
};
use quill_core::{types::DispatchSummary, DEFAULT_TRIGGER_LIMIT};
use serde::Deserialize;
use tracing::{error, info};

use crate::{
    error::{AppError, ApiResult},
    middleware::auth::{cron_auth, internal_auth},
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    let scheduled = Router::new()
        .route("/internal/cron/webhook-deliveries", post(scheduled_dispatch))
        .route_layer(from_fn_with_state(state.clone(), cron_auth));

    let on_demand = Router::new()
        .route("/internal/webhooks/dispatch", post(on_demand_dispatch))
        .route_layer(from_fn_with_state(state.clone(), internal_auth));

    scheduled.merge(on_demand).with_state(state)
}

#[derive(Debug, Deserialize)]
struct DispatchParams {
    limit: Option<String>,
}

async fn scheduled_dispatch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<DispatchSummary>> {
    let limit = state.settings.cron_batch_size;
    run(&state, limit, "scheduled", &request_id.0).await
}

async fn on_demand_dispatch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<DispatchParams>,
) -> ApiResult<Json<DispatchSummary>> {
    let limit = parse_limit(params.limit.as_deref())
        .map_err(|err| err.with_request_id(&request_id.0))?;
    run(&state, limit, "on_demand", &request_id.0).await
}

fn parse_limit(raw: Option<&str>) -> Result<i64, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DEFAULT_TRIGGER_LIMIT),
        Some(value) => value
            .parse()
            .map_err(|_| AppError::BadRequest(format!("limit must be an integer, got {:?}", value))),
    }
}

async fn run(
    state: &AppState,
    limit: i64,
    trigger: &'static str,
    request_id: &str,
) -> ApiResult<Json<DispatchSummary>> {
    let timeout = state.settings.dispatch.invocation_timeout();
    let dispatch = state.dispatcher.dispatch_pending_deliveries(limit);

    match tokio::time::timeout(timeout, dispatch).await {
        Ok(Ok(summary)) => {
            info!(trigger, limit, request_id, attempted = summary.attempted, "dispatch triggered");
            Ok(Json(summary))
        }
        Ok(Err(err)) => {
            error!(trigger, request_id, error = %err, "dispatch aborted");
            Err(AppError::DispatchUnavailable("Delivery store unavailable".to_string())
                .with_request_id(request_id))
        }
        Err(_) => {
            error!(
                trigger,
                request_id,
                timeout_secs = timeout.as_secs(),
                "dispatch invocation timed out"
            );
            Err(AppError::DispatchUnavailable("Dispatch timed out".to_string())
                .with_request_id(request_id))
        }
    }
}
