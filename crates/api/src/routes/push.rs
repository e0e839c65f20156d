//! `POST /send-push`.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router, middleware};
use serde_json::json;

use pushgate_common::error::AppError;
use pushgate_engine::request::SendPushRequest;

use crate::middleware::auth::ServiceAuth;
use crate::middleware::rate_limit::rate_limit;
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/send-push", post(send_push))
        .route_layer(middleware::from_fn_with_state(state, rate_limit))
}

/// Dispatch one push request and schedule its receipt check.
///
/// Responds once every batch has been submitted; receipts are reconciled
/// later in the background.
async fn send_push(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    payload: Result<Json<SendPushRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let request = payload.validate().inspect_err(|e| {
        tracing::warn!(error = %e, "Invalid push request");
    })?;

    tracing::info!(
        users = request.user_ids.len(),
        sender_user_id = request.sender_user_id,
        tournament_id = ?request.tournament_id,
        "Push request received"
    );

    let report = state.dispatcher.dispatch(&request).await.inspect_err(|e| {
        tracing::error!(error = %e, "Error sending push notifications");
    })?;

    tracing::info!(?report, "Push request dispatched");

    Ok(Json(json!({
        "success": true,
        "message": "Push notifications sent and receipt check scheduled."
    })))
}
