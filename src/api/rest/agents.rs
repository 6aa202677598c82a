use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::coordinator::NewAgent;
use crate::error::AppError;
use crate::models::agent::{AgentAvailability, AgentStats, DeliveryAgentProfile};
use crate::models::ids::{AgentId, OrderId};
use crate::models::order::AgentOrderView;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", post(create_agent).get(list_agents))
        .route("/agents/:id/availability", patch(update_availability))
        .route("/agents/:id/stats", get(agent_stats))
        .route("/agents/:id/orders/:order_id", get(agent_order))
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub availability: AgentAvailability,
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewAgent>,
) -> Result<Json<DeliveryAgentProfile>, AppError> {
    Ok(Json(state.coordinator.register_agent(payload).await?))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeliveryAgentProfile>>, AppError> {
    Ok(Json(state.coordinator.agents().await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AgentId>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<DeliveryAgentProfile>, AppError> {
    Ok(Json(
        state
            .coordinator
            .set_agent_availability(&id, payload.availability)
            .await?,
    ))
}

async fn agent_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AgentId>,
) -> Result<Json<AgentStats>, AppError> {
    Ok(Json(state.coordinator.agent_stats(&id).await?))
}

async fn agent_order(
    State(state): State<Arc<AppState>>,
    Path((id, order_id)): Path<(AgentId, OrderId)>,
) -> Result<Json<AgentOrderView>, AppError> {
    Ok(Json(state.coordinator.agent_view(order_id, &id).await?))
}
