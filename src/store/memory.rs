//! In-process stores backed by `DashMap`.
//!
//! Each record lives in its own map entry, so a conditional update holds only
//! that entry's shard lock while it checks and mutates. Nothing here survives
//! a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{
    AgentStatsStore, AgentStore, AgentUpdate, CasResult, Expectation, OrderStore, OtpStore,
    UpdateOutcome,
};
use crate::error::AppError;
use crate::models::agent::{AgentAvailability, AgentStats, DeliveryAgentProfile, StatsDelta};
use crate::models::ids::{AgentId, ChallengeId, OrderId};
use crate::models::order::{OrderRecord, Transition};
use crate::models::otp::{OtpChallenge, OtpPurpose, OtpStatus};

#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: DashMap<OrderId, OrderRecord>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: OrderRecord) -> Result<(), AppError> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "order {} already exists",
                order.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(())
            }
        }
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<OrderRecord>, AppError> {
        Ok(self.orders.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.orders.len())
    }

    async fn conditional_update(
        &self,
        order_id: OrderId,
        expectation: &Expectation,
        transition: &Transition,
    ) -> Result<UpdateOutcome, AppError> {
        let Some(mut order) = self.orders.get_mut(&order_id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        if !expectation.matches(&order) {
            return Ok(UpdateOutcome::Conflict {
                actual: order.assignment.status,
            });
        }

        order.apply(transition);
        Ok(UpdateOutcome::Updated(order.clone()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryOtpStore {
    challenges: DashMap<ChallengeId, OtpChallenge>,
    latest: DashMap<(OrderId, OtpPurpose), ChallengeId>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cancel_if_pending(&self, challenge_id: ChallengeId) -> bool {
        let Some(mut previous) = self.challenges.get_mut(&challenge_id) else {
            return false;
        };
        if previous.status != OtpStatus::Pending {
            return false;
        }
        previous.status = OtpStatus::Cancelled;
        previous.version += 1;
        true
    }

    fn latest_id(&self, order_id: OrderId, purpose: OtpPurpose) -> Option<ChallengeId> {
        self.latest
            .get(&(order_id, purpose))
            .map(|entry| *entry.value())
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn replace_pending(
        &self,
        challenge: OtpChallenge,
    ) -> Result<Option<ChallengeId>, AppError> {
        let key = (challenge.order_id, challenge.purpose);
        let challenge_id = challenge.id;

        // The index entry is held for the whole swap so two issuers for the
        // same (order, purpose) cannot both leave a pending challenge behind.
        let cancelled = match self.latest.entry(key) {
            Entry::Occupied(mut slot) => {
                let previous = *slot.get();
                let cancelled = self.cancel_if_pending(previous).then_some(previous);
                self.challenges.insert(challenge_id, challenge);
                slot.insert(challenge_id);
                cancelled
            }
            Entry::Vacant(slot) => {
                self.challenges.insert(challenge_id, challenge);
                slot.insert(challenge_id);
                None
            }
        };

        Ok(cancelled)
    }

    async fn get(&self, challenge_id: ChallengeId) -> Result<Option<OtpChallenge>, AppError> {
        Ok(self
            .challenges
            .get(&challenge_id)
            .map(|entry| entry.value().clone()))
    }

    async fn find_active(
        &self,
        order_id: OrderId,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError> {
        let latest = self.find_latest(order_id, purpose).await?;
        Ok(latest.filter(|challenge| challenge.status == OtpStatus::Pending))
    }

    async fn find_latest(
        &self,
        order_id: OrderId,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError> {
        let Some(challenge_id) = self.latest_id(order_id, purpose) else {
            return Ok(None);
        };
        self.get(challenge_id).await
    }

    async fn update(
        &self,
        mut challenge: OtpChallenge,
        expected_version: u64,
    ) -> Result<CasResult, AppError> {
        let Some(mut stored) = self.challenges.get_mut(&challenge.id) else {
            return Ok(CasResult::NotFound);
        };

        if stored.version != expected_version {
            return Ok(CasResult::VersionConflict {
                actual: stored.version,
            });
        }

        challenge.version = expected_version + 1;
        *stored = challenge;
        Ok(CasResult::Success)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut expired = 0;
        for mut entry in self.challenges.iter_mut() {
            let challenge = entry.value_mut();
            if challenge.status == OtpStatus::Pending && challenge.is_past_expiry(now) {
                challenge.status = OtpStatus::Expired;
                challenge.version += 1;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAgentStore {
    agents: DashMap<AgentId, DeliveryAgentProfile>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn insert(&self, profile: DeliveryAgentProfile) -> Result<(), AppError> {
        match self.agents.entry(profile.id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "agent {} already registered",
                profile.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(profile);
                Ok(())
            }
        }
    }

    async fn get(&self, agent_id: &AgentId) -> Result<Option<DeliveryAgentProfile>, AppError> {
        Ok(self.agents.get(agent_id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<DeliveryAgentProfile>, AppError> {
        Ok(self
            .agents
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.agents.len())
    }

    async fn attach(
        &self,
        agent_id: &AgentId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<AgentUpdate, AppError> {
        let Some(mut agent) = self.agents.get_mut(agent_id) else {
            return Ok(AgentUpdate::NotFound);
        };

        match agent.current_order {
            Some(current) if current == order_id => return Ok(AgentUpdate::Unchanged(agent.clone())),
            Some(_) => return Ok(AgentUpdate::Rejected(agent.clone())),
            None => {}
        }
        if agent.availability == AgentAvailability::Offline {
            return Ok(AgentUpdate::Rejected(agent.clone()));
        }

        agent.current_order = Some(order_id);
        agent.availability = AgentAvailability::Assigned;
        agent.updated_at = now;
        Ok(AgentUpdate::Updated(agent.clone()))
    }

    async fn detach(
        &self,
        agent_id: &AgentId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<AgentUpdate, AppError> {
        let Some(mut agent) = self.agents.get_mut(agent_id) else {
            return Ok(AgentUpdate::NotFound);
        };

        if agent.current_order != Some(order_id) {
            return Ok(AgentUpdate::Unchanged(agent.clone()));
        }

        agent.current_order = None;
        if agent.availability != AgentAvailability::Offline {
            agent.availability = AgentAvailability::Available;
        }
        agent.updated_at = now;
        Ok(AgentUpdate::Updated(agent.clone()))
    }

    async fn set_availability(
        &self,
        agent_id: &AgentId,
        availability: AgentAvailability,
        now: DateTime<Utc>,
    ) -> Result<AgentUpdate, AppError> {
        let Some(mut agent) = self.agents.get_mut(agent_id) else {
            return Ok(AgentUpdate::NotFound);
        };

        if availability == AgentAvailability::Available && agent.current_order.is_some() {
            return Ok(AgentUpdate::Rejected(agent.clone()));
        }
        if agent.availability == availability {
            return Ok(AgentUpdate::Unchanged(agent.clone()));
        }

        agent.availability = availability;
        agent.updated_at = now;
        Ok(AgentUpdate::Updated(agent.clone()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryAgentStatsStore {
    stats: DashMap<AgentId, AgentStats>,
}

impl MemoryAgentStatsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStatsStore for MemoryAgentStatsStore {
    async fn increment(
        &self,
        agent_id: &AgentId,
        delta: StatsDelta,
    ) -> Result<AgentStats, AppError> {
        let mut stats = self.stats.entry(agent_id.clone()).or_default();
        stats.apply(delta);
        Ok(stats.clone())
    }

    async fn get(&self, agent_id: &AgentId) -> Result<Option<AgentStats>, AppError> {
        Ok(self.stats.get(agent_id).map(|entry| entry.value().clone()))
    }
}
