//! Health, estimates and debug endpoints

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::api::error::ApiError;
use crate::api::server::SharedAppState;
use crate::api::service::EstimateView;
use crate::common::BridgeError;
use crate::notify::PushMessage;

/// GET /api/health
pub async fn handle_health(State(state): State<SharedAppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "xbridge",
        "version": env!("CARGO_PKG_VERSION"),
        "ws_subscribers": state.events.subscriber_count()
    }))
}

/// GET /api/estimate-time
pub async fn handle_estimate_time(State(state): State<SharedAppState>) -> Json<EstimateView> {
    Json(state.service.estimate_time().await)
}

/// GET /api/push-messages
pub async fn handle_push_messages(
    State(state): State<SharedAppState>,
) -> Result<Json<Vec<PushMessage>>, ApiError> {
    match &state.push_log {
        Some(log) => Ok(Json(log.messages())),
        None => Err(BridgeError::not_found("push message recording is disabled").into()),
    }
}
