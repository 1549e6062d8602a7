use axum::{
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use quill_core::{
    types::{DeliveryStatus, WebhookDelivery},
    RECENT_DELIVERIES_LIMIT,
};
use serde::Serialize;
use tracing::error;

use crate::{
    error::{AppError, ApiResult},
    middleware::auth::internal_auth,
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/internal/webhooks/{id}/deliveries", get(list_deliveries))
        .route_layer(from_fn_with_state(state.clone(), internal_auth))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryListResponse {
    webhook_id: String,
    items: Vec<DeliveryItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryItem {
    id: String,
    event_type: String,
    event_data: serde_json::Value,
    status: DeliveryStatus,
    attempt_number: i32,
    max_attempts: i32,
    response_status: Option<i32>,
    error_message: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl From<WebhookDelivery> for DeliveryItem {
    fn from(delivery: WebhookDelivery) -> Self {
        Self {
            id: delivery.id,
            event_type: delivery.event_type,
            event_data: delivery.event_data,
            status: delivery.status,
            attempt_number: delivery.attempt_number,
            max_attempts: delivery.max_attempts,
            response_status: delivery.response_status,
            error_message: delivery.error_message,
            next_attempt_at: delivery.next_attempt_at,
            created_at: delivery.created_at,
            delivered_at: delivery.delivered_at,
        }
    }
}

async fn list_deliveries(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(webhook_id): Path<String>,
) -> ApiResult<Json<DeliveryListResponse>> {
    let internal = |err: quill_db::StoreError| {
        error!(webhook_id = %webhook_id, error = %err, "failed to load deliveries");
        AppError::Internal.with_request_id(&request_id.0)
    };

    let subscription = state.store.get_subscription(&webhook_id).await.map_err(internal)?;
    if subscription.is_none() {
        return Err(AppError::NotFound(format!("webhook {} not found", webhook_id))
            .with_request_id(&request_id.0));
    }

    let items = state
        .store
        .list_recent_deliveries(&webhook_id, RECENT_DELIVERIES_LIMIT)
        .await
        .map_err(internal)?
        .into_iter()
        .map(DeliveryItem::from)
        .collect();

    Ok(Json(DeliveryListResponse { webhook_id, items }))
}
