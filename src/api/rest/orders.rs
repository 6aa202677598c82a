use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::coordinator::{DeliveryRequest, PickupRequest, TransitionOutcome};
use crate::error::AppError;
use crate::models::ids::{AgentId, ChallengeId, OrderId};
use crate::models::order::{AdminApprovalStatus, NewOrder, OrderRecord};
use crate::models::otp::OtpChallenge;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/approval", post(set_approval))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/accept", post(accept_assignment))
        .route("/orders/:id/reject", post(reject_assignment))
        .route("/orders/:id/pickup", post(complete_pickup))
        .route("/orders/:id/otp", post(issue_delivery_otp))
        .route("/orders/:id/deliver", post(complete_delivery))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/otp/:id/verify", post(verify_otp))
}

#[derive(Deserialize)]
pub struct ApprovalRequest {
    pub status: AdminApprovalStatus,
}

#[derive(Deserialize)]
pub struct AgentRequest {
    pub agent_id: AgentId,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub agent_id: AgentId,
    pub reason: String,
}

/// Agent-scoped body carrying an operation payload alongside `agent_id`.
#[derive(Deserialize)]
pub struct AgentAction<T> {
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub details: T,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewOrder>,
) -> Result<Json<OrderRecord>, AppError> {
    Ok(Json(state.coordinator.register_order(payload).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderRecord>, AppError> {
    Ok(Json(state.coordinator.order(id).await?))
}

async fn set_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<ApprovalRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(
        state
            .coordinator
            .set_admin_approval(id, payload.status)
            .await?,
    ))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<AgentRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(state.coordinator.assign(id, &payload.agent_id).await?))
}

async fn accept_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<AgentRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(state.coordinator.accept(id, &payload.agent_id).await?))
}

async fn reject_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(
        state
            .coordinator
            .reject(id, &payload.agent_id, &payload.reason)
            .await?,
    ))
}

async fn complete_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<AgentAction<PickupRequest>>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(
        state
            .coordinator
            .complete_pickup(id, &payload.agent_id, payload.details)
            .await?,
    ))
}

async fn issue_delivery_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<AgentRequest>,
) -> Result<Json<OtpChallenge>, AppError> {
    Ok(Json(
        state
            .coordinator
            .issue_delivery_otp(id, &payload.agent_id)
            .await?,
    ))
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<AgentAction<DeliveryRequest>>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(
        state
            .coordinator
            .complete_delivery(id, &payload.agent_id, payload.details)
            .await?,
    ))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(state.coordinator.cancel(id, &payload.reason).await?))
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ChallengeId>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<OtpChallenge>, AppError> {
    Ok(Json(state.coordinator.verify_otp(id, &payload.code).await?))
}
