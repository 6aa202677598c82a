//! Order lifecycle coordinator.
//!
//! ```text
//! Unassigned --assign--> Assigned --accept--> Accepted --pickup--> PickupCompleted
//!     ^                      |                                        |
//!     +-------reject---------+                          deliver (otp) v
//!                                                             DeliveryCompleted
//! ```
//!
//! `Cancelled` can be reached from any non-terminal state. Each transition is
//! one conditional update against the order store; notifications and stats
//! follow the commit and never undo it.

pub mod guards;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::AppError;
use crate::models::agent::{AgentAvailability, AgentStats, DeliveryAgentProfile, GeoPoint};
use crate::models::ids::{AgentId, ChallengeId, OrderId};
use crate::models::notification::{Channel, DeliveryEvent, Notification};
use crate::models::order::{
    AdminApprovalStatus, AgentOrderView, AssignmentStatus, CodMethod, CodPayment, NewOrder,
    OrderRecord,
};
use crate::models::otp::{OtpChallenge, OtpPurpose};
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;
use crate::otp::{IssueRequest, OtpService};
use crate::stats::StatsAggregator;
use crate::store::{AgentStore, AgentUpdate, OrderStore, UpdateOutcome};

use self::guards::{DeliveryPlan, Plan};

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub order: OrderRecord,
    /// `false` when the call found its effect already in place.
    pub applied: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PickupRequest {
    pub order_number_verification: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodCollection {
    pub amount: f64,
    pub method: CodMethod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryRequest {
    #[serde(default)]
    pub otp_code: Option<String>,
    pub recipient_name: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub cod_payment: Option<CodCollection>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAgent {
    pub id: AgentId,
    pub name: String,
    pub phone: String,
}

/// Sole writer of an order's assignment, pickup, delivery and status fields.
pub struct DeliveryCoordinator {
    orders: Arc<dyn OrderStore>,
    agents: Arc<dyn AgentStore>,
    otp: Arc<OtpService>,
    stats: StatsAggregator,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl DeliveryCoordinator {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        agents: Arc<dyn AgentStore>,
        otp: Arc<OtpService>,
        stats: StatsAggregator,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            agents,
            otp,
            stats,
            notifier,
            clock,
            metrics,
        }
    }

    pub fn otp(&self) -> &Arc<OtpService> {
        &self.otp
    }

    pub async fn register_order(&self, new_order: NewOrder) -> Result<OrderRecord, AppError> {
        if new_order.order_number.trim().is_empty() {
            return Err(AppError::BadRequest("order number cannot be empty".to_string()));
        }
        if new_order.seller_id.trim().is_empty() {
            return Err(AppError::BadRequest("seller id cannot be empty".to_string()));
        }
        for (field, amount) in [
            ("total_price", new_order.total_price),
            ("delivery_fee", new_order.delivery_fee),
        ] {
            if !amount.is_finite() || amount < 0.0 {
                return Err(AppError::BadRequest(format!("{field} must be >= 0")));
            }
        }

        let order = OrderRecord::new(OrderId::new(), new_order, self.clock.now());
        self.orders.insert(order.clone()).await?;

        info!(
            order_id = %order.id,
            approval = ?order.admin_approval,
            "order registered"
        );
        Ok(order)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<OrderRecord, AppError> {
        self.load(order_id).await
    }

    pub async fn order_count(&self) -> Result<usize, AppError> {
        self.orders.count().await
    }

    pub async fn agent_view(
        &self,
        order_id: OrderId,
        agent_id: &AgentId,
    ) -> Result<AgentOrderView, AppError> {
        self.load(order_id)
            .await?
            .view_for_agent(agent_id)
            .ok_or(AppError::NotAssigned)
    }

    pub async fn set_admin_approval(
        &self,
        order_id: OrderId,
        status: AdminApprovalStatus,
    ) -> Result<TransitionOutcome, AppError> {
        let started = Instant::now();
        let result = self
            .commit(order_id, |order, now| {
                guards::plan_approval(order, status, now)
            })
            .await;

        if let Ok(outcome) = &result {
            if outcome.applied {
                info!(order_id = %order_id, approval = ?status, "admin approval updated");
            }
        }
        self.observe("approval", started, &result);
        result
    }

    pub async fn assign(
        &self,
        order_id: OrderId,
        agent_id: &AgentId,
    ) -> Result<TransitionOutcome, AppError> {
        let started = Instant::now();
        let result = async {
            let agent = self.require_agent(agent_id).await?;
            if agent.availability == AgentAvailability::Offline {
                return Err(AppError::InvalidState(format!("agent {agent_id} is offline")));
            }

            let outcome = self
                .commit(order_id, |order, now| guards::plan_assign(order, agent_id, now))
                .await?;

            let order = &outcome.order;
            info!(order_id = %order_id, agent_id = %agent_id, "order assigned");
            self.notify(
                order,
                &[Channel::Agent],
                DeliveryEvent::OrderAssigned {
                    order_id,
                    agent_id: agent_id.clone(),
                    assigned_at: order.assignment.assigned_at.unwrap_or(order.updated_at),
                },
            );

            Ok::<_, AppError>(outcome)
        }
        .await;

        self.observe("assign", started, &result);
        result
    }

    /// Accepts an assignment. A repeated accept by the same agent returns the
    /// current order with `applied == false` and has no side effects.
    pub async fn accept(
        &self,
        order_id: OrderId,
        agent_id: &AgentId,
    ) -> Result<TransitionOutcome, AppError> {
        let started = Instant::now();
        let result = async {
            let order = self.load(order_id).await?;
            if guards::plan_accept(&order, agent_id, self.clock.now())? == Plan::Unchanged {
                debug!(order_id = %order_id, agent_id = %agent_id, "duplicate accept ignored");
                return Ok(TransitionOutcome {
                    order,
                    applied: false,
                });
            }

            let newly_attached = match self.agents.attach(agent_id, order_id, self.clock.now()).await? {
                AgentUpdate::Updated(_) => true,
                AgentUpdate::Unchanged(_) => false,
                AgentUpdate::Rejected(agent) => {
                    return Err(AppError::InvalidState(format!(
                        "agent {agent_id} cannot take this order (availability {:?}, current order {})",
                        agent.availability,
                        agent
                            .current_order
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "none".to_string())
                    )));
                }
                AgentUpdate::NotFound => {
                    return Err(AppError::NotFound(format!("agent {agent_id} not found")));
                }
            };

            let outcome = match self
                .commit(order_id, |order, now| guards::plan_accept(order, agent_id, now))
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    // A concurrent accept by the same agent may have won and
                    // moved on; the attachment is theirs then.
                    if newly_attached && !self.holds_order(order_id, agent_id).await {
                        self.release_agent(agent_id, order_id).await;
                    }
                    return Err(err);
                }
            };

            if outcome.applied {
                let order = &outcome.order;
                info!(order_id = %order_id, agent_id = %agent_id, "assignment accepted");

                if let Err(err) = self.stats.record_acceptance(agent_id).await {
                    warn!(agent_id = %agent_id, error = %err, "failed to record acceptance");
                }
                self.notify(
                    order,
                    &[Channel::Buyer, Channel::Seller, Channel::Admin],
                    DeliveryEvent::AssignmentAccepted {
                        order_id,
                        order_number: order.order_number.clone(),
                        agent_id: agent_id.clone(),
                        accepted_at: order.assignment.accepted_at.unwrap_or(order.updated_at),
                    },
                );
            }

            Ok::<_, AppError>(outcome)
        }
        .await;

        self.observe("accept", started, &result);
        result
    }

    /// Hands the order back to the assignment pool. The rejecting agent is not
    /// excluded from being assigned the same order again.
    pub async fn reject(
        &self,
        order_id: OrderId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<TransitionOutcome, AppError> {
        let started = Instant::now();
        let result = async {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(AppError::BadRequest(
                    "rejection reason cannot be empty".to_string(),
                ));
            }

            let outcome = self
                .commit(order_id, |order, now| {
                    guards::plan_reject(order, agent_id, reason, now)
                })
                .await?;

            let order = &outcome.order;
            info!(order_id = %order_id, agent_id = %agent_id, reason, "assignment rejected");
            self.notify(
                order,
                &[Channel::Admin, Channel::Seller],
                DeliveryEvent::AssignmentRejected {
                    order_id,
                    order_number: order.order_number.clone(),
                    agent_id: agent_id.clone(),
                    reason: reason.to_string(),
                    rejected_at: order.assignment.rejected_at.unwrap_or(order.updated_at),
                },
            );

            Ok::<_, AppError>(outcome)
        }
        .await;

        self.observe("reject", started, &result);
        result
    }

    pub async fn complete_pickup(
        &self,
        order_id: OrderId,
        agent_id: &AgentId,
        request: PickupRequest,
    ) -> Result<TransitionOutcome, AppError> {
        let started = Instant::now();
        let result = async {
            let outcome = self
                .commit(order_id, |order, now| {
                    guards::plan_pickup(
                        order,
                        agent_id,
                        &request.order_number_verification,
                        request.notes.clone(),
                        request.location.clone(),
                        now,
                    )
                })
                .await
                .inspect_err(|err| {
                    if matches!(err, AppError::VerificationMismatch(_)) {
                        warn!(order_id = %order_id, agent_id = %agent_id, "pickup order number mismatch");
                    }
                })?;

            let order = &outcome.order;
            info!(order_id = %order_id, agent_id = %agent_id, "pickup completed");

            match self
                .agents
                .set_availability(agent_id, AgentAvailability::Delivering, self.clock.now())
                .await
            {
                Ok(AgentUpdate::Updated(_) | AgentUpdate::Unchanged(_)) => {}
                Ok(other) => warn!(agent_id = %agent_id, update = ?other, "agent not marked delivering"),
                Err(err) => warn!(agent_id = %agent_id, error = %err, "failed to mark agent delivering"),
            }
            if let Err(err) = self.stats.record_pickup(agent_id).await {
                warn!(agent_id = %agent_id, error = %err, "failed to record pickup");
            }
            self.notify(
                order,
                &[Channel::Buyer, Channel::Seller, Channel::Admin],
                DeliveryEvent::PickupCompleted {
                    order_id,
                    order_number: order.order_number.clone(),
                    agent_id: agent_id.clone(),
                    completed_at: order.pickup.completed_at.unwrap_or(order.updated_at),
                },
            );

            Ok::<_, AppError>(outcome)
        }
        .await;

        self.observe("complete_pickup", started, &result);
        result
    }

    /// Issues the buyer's delivery code once the agent has the parcel.
    pub async fn issue_delivery_otp(
        &self,
        order_id: OrderId,
        agent_id: &AgentId,
    ) -> Result<OtpChallenge, AppError> {
        let started = Instant::now();
        let result = async {
            let order = self.load(order_id).await?;
            guards::check_otp_issue(&order, agent_id)?;

            self.otp
                .issue(IssueRequest {
                    order_id,
                    agent_id: agent_id.clone(),
                    user_id: order.buyer.user_id.clone(),
                    purpose: OtpPurpose::DeliveryConfirmation,
                    phone: order.buyer.phone.clone(),
                    language: order.buyer.language.clone(),
                })
                .await
        }
        .await;

        self.observe("issue_otp", started, &result);
        result
    }

    pub async fn verify_otp(
        &self,
        challenge_id: ChallengeId,
        code: &str,
    ) -> Result<OtpChallenge, AppError> {
        let started = Instant::now();
        let result = self.otp.verify(challenge_id, code).await;
        self.observe("verify_otp", started, &result);
        result
    }

    /// Completes the hand-over. Preconditions are checked before the OTP is
    /// consumed, so a call that cannot succeed never burns an attempt. A code
    /// already verified for this order is accepted; the order can still only
    /// reach `DeliveryCompleted` once.
    pub async fn complete_delivery(
        &self,
        order_id: OrderId,
        agent_id: &AgentId,
        request: DeliveryRequest,
    ) -> Result<TransitionOutcome, AppError> {
        let started = Instant::now();
        let result = async {
            let recipient_name = request.recipient_name.trim();
            if recipient_name.is_empty() {
                return Err(AppError::BadRequest(
                    "recipient name cannot be empty".to_string(),
                ));
            }

            let cod_payment = request.cod_payment.as_ref().map(|cod| CodPayment {
                amount: cod.amount,
                method: cod.method,
                collected_at: self.clock.now(),
            });

            let order = self.load(order_id).await?;
            guards::check_delivery(&order, agent_id)?;
            guards::validate_cod(&order, cod_payment.as_ref())?;

            if order.requires_delivery_otp {
                self.otp
                    .verify_active(
                        order_id,
                        OtpPurpose::DeliveryConfirmation,
                        request.otp_code.as_deref(),
                    )
                    .await?;
            }

            let plan = DeliveryPlan {
                recipient_name,
                notes: request.notes.as_deref(),
                location: request.location.as_ref(),
                cod_payment: cod_payment.as_ref(),
            };
            let outcome = self
                .commit(order_id, |order, now| {
                    guards::plan_delivery(order, agent_id, &plan, now)
                })
                .await?;

            let order = &outcome.order;
            let completed_at = order.delivery.completed_at.unwrap_or(order.updated_at);
            info!(order_id = %order_id, agent_id = %agent_id, "delivery completed");

            self.release_agent(agent_id, order_id).await;

            let duration_minutes = minutes_between(order.assignment.accepted_at, completed_at);
            if let Err(err) = self
                .stats
                .record_delivery(agent_id, order.delivery_fee, duration_minutes)
                .await
            {
                warn!(agent_id = %agent_id, error = %err, "failed to record delivery");
            }

            self.notify(
                order,
                &[Channel::Buyer, Channel::Seller],
                DeliveryEvent::DeliveryCompleted {
                    order_id,
                    order_number: order.order_number.clone(),
                    agent_id: agent_id.clone(),
                    recipient_name: recipient_name.to_string(),
                    completed_at,
                },
            );
            if let Some(cod) = &order.delivery.cod_payment {
                self.notify(
                    order,
                    &[Channel::Admin],
                    DeliveryEvent::CodCollected {
                        order_id,
                        order_number: order.order_number.clone(),
                        agent_id: agent_id.clone(),
                        amount: cod.amount,
                        method: cod.method,
                    },
                );
            }

            Ok::<_, AppError>(outcome)
        }
        .await;

        self.observe("complete_delivery", started, &result);
        result
    }

    pub async fn cancel(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<TransitionOutcome, AppError> {
        let started = Instant::now();
        let result = async {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(AppError::BadRequest(
                    "cancellation reason cannot be empty".to_string(),
                ));
            }

            let outcome = self
                .commit(order_id, |order, now| guards::plan_cancel(order, reason, now))
                .await?;

            let order = &outcome.order;
            info!(order_id = %order_id, reason, "order cancelled");

            if let Some(agent_id) = &order.assignment.agent_id {
                self.release_agent(agent_id, order_id).await;
            }
            let cancelled_at = order
                .cancellation
                .as_ref()
                .map_or(order.updated_at, |c| c.cancelled_at);
            let cancelled = |order_number: Option<String>| DeliveryEvent::OrderCancelled {
                order_id,
                order_number,
                reason: reason.to_string(),
                cancelled_at,
            };

            self.notify(
                order,
                &[Channel::Buyer, Channel::Seller],
                cancelled(Some(order.order_number.clone())),
            );
            if order.assignment.agent_id.is_some() {
                let order_number = order
                    .assignment
                    .status
                    .is_accepted_or_later()
                    .then(|| order.order_number.clone());
                self.notify(order, &[Channel::Agent], cancelled(order_number));
            }

            Ok::<_, AppError>(outcome)
        }
        .await;

        self.observe("cancel", started, &result);
        result
    }

    pub async fn register_agent(&self, agent: NewAgent) -> Result<DeliveryAgentProfile, AppError> {
        if agent.id.as_str().trim().is_empty() {
            return Err(AppError::BadRequest("agent id cannot be empty".to_string()));
        }
        if agent.name.trim().is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }
        if agent.phone.trim().is_empty() {
            return Err(AppError::BadRequest("phone cannot be empty".to_string()));
        }

        let profile =
            DeliveryAgentProfile::new(agent.id, agent.name, agent.phone, self.clock.now());
        self.agents.insert(profile.clone()).await?;

        info!(agent_id = %profile.id, "delivery agent registered");
        Ok(profile)
    }

    pub async fn agents(&self) -> Result<Vec<DeliveryAgentProfile>, AppError> {
        self.agents.list().await
    }

    pub async fn agent_count(&self) -> Result<usize, AppError> {
        self.agents.count().await
    }

    /// Only `Available` and `Offline` may be set from outside; the other
    /// states follow the agent's current order.
    pub async fn set_agent_availability(
        &self,
        agent_id: &AgentId,
        availability: AgentAvailability,
    ) -> Result<DeliveryAgentProfile, AppError> {
        if !matches!(
            availability,
            AgentAvailability::Available | AgentAvailability::Offline
        ) {
            return Err(AppError::BadRequest(format!(
                "{availability:?} is managed by the order lifecycle"
            )));
        }

        match self
            .agents
            .set_availability(agent_id, availability, self.clock.now())
            .await?
        {
            AgentUpdate::Updated(agent) | AgentUpdate::Unchanged(agent) => Ok(agent),
            AgentUpdate::Rejected(_) => Err(AppError::InvalidState(format!(
                "agent {agent_id} still has an active order"
            ))),
            AgentUpdate::NotFound => Err(AppError::NotFound(format!("agent {agent_id} not found"))),
        }
    }

    pub async fn agent_stats(&self, agent_id: &AgentId) -> Result<AgentStats, AppError> {
        self.require_agent(agent_id).await?;
        self.stats.stats(agent_id).await
    }

    async fn load(&self, order_id: OrderId) -> Result<OrderRecord, AppError> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn require_agent(&self, agent_id: &AgentId) -> Result<DeliveryAgentProfile, AppError> {
        self.agents
            .get(agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))
    }

    /// Reads the order, asks `plan` what to do, and applies it conditionally.
    /// A lost race is re-planned once from a fresh read before it surfaces as
    /// `Conflict`.
    async fn commit<F>(&self, order_id: OrderId, mut plan: F) -> Result<TransitionOutcome, AppError>
    where
        F: FnMut(&OrderRecord, DateTime<Utc>) -> Result<Plan, AppError> + Send,
    {
        let mut retried = false;

        loop {
            let order = self.load(order_id).await?;

            let (expectation, transition) = match plan(&order, self.clock.now())? {
                Plan::Unchanged => {
                    return Ok(TransitionOutcome {
                        order,
                        applied: false,
                    });
                }
                Plan::Apply {
                    expectation,
                    transition,
                } => (expectation, transition),
            };

            match self
                .orders
                .conditional_update(order_id, &expectation, &transition)
                .await?
            {
                UpdateOutcome::Updated(order) => {
                    return Ok(TransitionOutcome {
                        order,
                        applied: true,
                    });
                }
                UpdateOutcome::NotFound => {
                    return Err(AppError::NotFound(format!("order {order_id} not found")));
                }
                UpdateOutcome::Conflict { actual } if !retried => {
                    debug!(order_id = %order_id, actual = ?actual, "conditional update lost a race; re-reading");
                    retried = true;
                }
                UpdateOutcome::Conflict { actual } => {
                    return Err(AppError::Conflict(format!(
                        "order {order_id} changed concurrently (now {actual:?}); re-read and retry"
                    )));
                }
            }
        }
    }

    /// Whether `agent_id` currently carries the accepted, still active order.
    async fn holds_order(&self, order_id: OrderId, agent_id: &AgentId) -> bool {
        match self.orders.get(order_id).await {
            Ok(Some(order)) => {
                !order.is_cancelled()
                    && order.is_assigned_to(agent_id)
                    && order.assignment.status.is_accepted_or_later()
                    && order.assignment.status != AssignmentStatus::DeliveryCompleted
            }
            Ok(None) => false,
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "could not re-read order; keeping agent attached");
                true
            }
        }
    }

    async fn release_agent(&self, agent_id: &AgentId, order_id: OrderId) {
        match self.agents.detach(agent_id, order_id, self.clock.now()).await {
            Ok(AgentUpdate::Updated(_) | AgentUpdate::Unchanged(_)) => {}
            Ok(other) => warn!(agent_id = %agent_id, order_id = %order_id, update = ?other, "agent release had no effect"),
            Err(err) => warn!(agent_id = %agent_id, order_id = %order_id, error = %err, "failed to release agent"),
        }
    }

    fn notify(&self, order: &OrderRecord, channels: &[Channel], event: DeliveryEvent) {
        self.notifier
            .emit_all(channels.iter().map(|&channel| Notification {
                channel,
                recipient: recipient(order, channel),
                event: event.clone(),
            }));
    }

    fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T, AppError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };

        self.metrics
            .transitions_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.metrics
            .transition_latency_seconds
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());

        if let Err(err) = result {
            debug!(operation, error = %err, "operation refused");
        }
    }
}

fn recipient(order: &OrderRecord, channel: Channel) -> Option<String> {
    match channel {
        Channel::Buyer => Some(order.buyer.user_id.to_string()),
        Channel::Seller => Some(order.seller_id.clone()),
        Channel::Agent => order.assignment.agent_id.as_ref().map(ToString::to_string),
        Channel::Admin => None,
    }
}

fn minutes_between(from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> f64 {
    from.map_or(0.0, |from| (to - from).num_seconds().max(0) as f64 / 60.0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::models::ids::UserId;
    use crate::models::order::{BuyerContact, PaymentMethod, Transition};
    use crate::notify::BroadcastDispatcher;
    use crate::otp::OtpPolicy;
    use crate::otp::channel::OutboxCodeSender;
    use crate::otp::code::RandomCodeGenerator;
    use crate::store::Expectation;
    use crate::store::memory::{
        MemoryAgentStatsStore, MemoryAgentStore, MemoryOrderStore, MemoryOtpStore,
    };

    /// Lets a competing accept and pickup land just before the first accept
    /// commits, then reports the lost race.
    #[derive(Default)]
    struct OvertakenOrderStore {
        inner: MemoryOrderStore,
        overtaken: AtomicBool,
    }

    #[async_trait]
    impl OrderStore for OvertakenOrderStore {
        async fn insert(&self, order: OrderRecord) -> Result<(), AppError> {
            self.inner.insert(order).await
        }

        async fn get(&self, order_id: OrderId) -> Result<Option<OrderRecord>, AppError> {
            self.inner.get(order_id).await
        }

        async fn count(&self) -> Result<usize, AppError> {
            self.inner.count().await
        }

        async fn conditional_update(
            &self,
            order_id: OrderId,
            expectation: &Expectation,
            transition: &Transition,
        ) -> Result<UpdateOutcome, AppError> {
            if matches!(transition, Transition::Accept { .. })
                && !self.overtaken.swap(true, Ordering::SeqCst)
            {
                let UpdateOutcome::Updated(accepted) = self
                    .inner
                    .conditional_update(order_id, expectation, transition)
                    .await?
                else {
                    panic!("competing accept did not apply");
                };
                let agent_id = accepted.assignment.agent_id.clone().expect("assigned agent");
                self.inner
                    .conditional_update(
                        order_id,
                        &Expectation::of(&accepted),
                        &Transition::CompletePickup {
                            agent_id,
                            notes: None,
                            location: None,
                            at: transition.at(),
                        },
                    )
                    .await?;
                return Ok(UpdateOutcome::Conflict {
                    actual: AssignmentStatus::PickupCompleted,
                });
            }

            self.inner
                .conditional_update(order_id, expectation, transition)
                .await
        }
    }

    fn coordinator(orders: Arc<dyn OrderStore>, agents: Arc<MemoryAgentStore>) -> DeliveryCoordinator {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let metrics = Metrics::new();
        let otp = Arc::new(OtpService::new(
            Arc::new(MemoryOtpStore::new()),
            Arc::new(OutboxCodeSender::new()),
            Arc::new(RandomCodeGenerator),
            clock.clone(),
            OtpPolicy::default(),
            metrics.clone(),
        ));
        DeliveryCoordinator::new(
            orders,
            agents,
            otp,
            StatsAggregator::new(Arc::new(MemoryAgentStatsStore::new())),
            Notifier::new(
                Arc::new(BroadcastDispatcher::new(16)),
                Duration::from_millis(200),
                metrics.clone(),
            ),
            clock,
            metrics,
        )
    }

    #[tokio::test]
    async fn losing_accept_keeps_agent_on_order_the_winner_picked_up() {
        let agents = Arc::new(MemoryAgentStore::new());
        let coordinator = coordinator(Arc::new(OvertakenOrderStore::default()), agents.clone());
        let a7 = AgentId::from("A7");

        coordinator
            .register_agent(NewAgent {
                id: a7.clone(),
                name: "Ravi".to_string(),
                phone: "+919800000099".to_string(),
            })
            .await
            .unwrap();
        let order = coordinator
            .register_order(NewOrder {
                order_number: "ORD1001".to_string(),
                seller_id: "seller-1".to_string(),
                buyer: BuyerContact {
                    user_id: UserId::from("buyer-1"),
                    phone: "+919800000001".to_string(),
                    language: "en".to_string(),
                },
                payment_method: PaymentMethod::Prepaid,
                total_price: 1299.0,
                delivery_fee: 40.0,
                requires_delivery_otp: true,
                admin_approval: Some(AdminApprovalStatus::Approved),
            })
            .await
            .unwrap();
        coordinator.assign(order.id, &a7).await.unwrap();

        let err = coordinator.accept(order.id, &a7).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyProcessed(_)));

        let stored = coordinator.order(order.id).await.unwrap();
        assert_eq!(stored.assignment.status, AssignmentStatus::PickupCompleted);
        let agent = agents.get(&a7).await.unwrap().unwrap();
        assert_eq!(agent.current_order, Some(order.id));
        assert_eq!(agent.availability, AgentAvailability::Assigned);
    }
}
