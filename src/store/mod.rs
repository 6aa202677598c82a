//! Persistence seams for the coordinator.
//!
//! Every state change goes through a conditional update: the caller states
//! what it read (the [`Expectation`]) and the store applies the mutation only
//! if that still holds, atomically with respect to other writers of the same
//! record. Records with different ids never contend.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::agent::{AgentAvailability, AgentStats, DeliveryAgentProfile, StatsDelta};
use crate::models::ids::{AgentId, ChallengeId, OrderId};
use crate::models::order::{AssignmentStatus, OrderRecord, Transition};
use crate::models::otp::{OtpChallenge, OtpPurpose};

/// Assignment state an order must still be in for a transition to apply.
/// Cancelled orders never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub status: AssignmentStatus,
    pub agent_id: Option<AgentId>,
}

impl Expectation {
    pub fn of(order: &OrderRecord) -> Self {
        Self {
            status: order.assignment.status,
            agent_id: order.assignment.agent_id.clone(),
        }
    }

    pub fn matches(&self, order: &OrderRecord) -> bool {
        !order.is_cancelled()
            && order.assignment.status == self.status
            && order.assignment.agent_id == self.agent_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(OrderRecord),
    Conflict { actual: AssignmentStatus },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    Success,
    NotFound,
    VersionConflict { actual: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentUpdate {
    Updated(DeliveryAgentProfile),
    Unchanged(DeliveryAgentProfile),
    Rejected(DeliveryAgentProfile),
    NotFound,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: OrderRecord) -> Result<(), AppError>;

    async fn get(&self, order_id: OrderId) -> Result<Option<OrderRecord>, AppError>;

    async fn count(&self) -> Result<usize, AppError>;

    /// Applies `transition` only if `expectation` still matches the stored order.
    async fn conditional_update(
        &self,
        order_id: OrderId,
        expectation: &Expectation,
        transition: &Transition,
    ) -> Result<UpdateOutcome, AppError>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Stores `challenge` as the pending challenge for its (order, purpose),
    /// cancelling the previous one if it was still pending. Returns the id of
    /// the challenge that was cancelled.
    async fn replace_pending(
        &self,
        challenge: OtpChallenge,
    ) -> Result<Option<ChallengeId>, AppError>;

    async fn get(&self, challenge_id: ChallengeId) -> Result<Option<OtpChallenge>, AppError>;

    async fn find_active(
        &self,
        order_id: OrderId,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError>;

    /// Most recently issued challenge for (order, purpose), whatever its status.
    async fn find_latest(
        &self,
        order_id: OrderId,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError>;

    /// Replaces the stored challenge if its version is still `expected_version`.
    async fn update(
        &self,
        challenge: OtpChallenge,
        expected_version: u64,
    ) -> Result<CasResult, AppError>;

    /// Marks pending challenges past their expiry as expired. Returns how many.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, AppError>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn insert(&self, profile: DeliveryAgentProfile) -> Result<(), AppError>;

    async fn get(&self, agent_id: &AgentId) -> Result<Option<DeliveryAgentProfile>, AppError>;

    async fn list(&self) -> Result<Vec<DeliveryAgentProfile>, AppError>;

    async fn count(&self) -> Result<usize, AppError>;

    /// Makes `order_id` the agent's current order. Rejected when the agent is
    /// offline or already carries a different order.
    async fn attach(
        &self,
        agent_id: &AgentId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<AgentUpdate, AppError>;

    /// Clears the current order if it is `order_id`; otherwise unchanged.
    async fn detach(
        &self,
        agent_id: &AgentId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<AgentUpdate, AppError>;

    /// Rejected when it would make an agent with a current order `Available`.
    async fn set_availability(
        &self,
        agent_id: &AgentId,
        availability: AgentAvailability,
        now: DateTime<Utc>,
    ) -> Result<AgentUpdate, AppError>;
}

#[async_trait]
pub trait AgentStatsStore: Send + Sync {
    async fn increment(&self, agent_id: &AgentId, delta: StatsDelta)
    -> Result<AgentStats, AppError>;

    async fn get(&self, agent_id: &AgentId) -> Result<Option<AgentStats>, AppError>;
}
