//! Agent performance counters.
//!
//! Updates are increments, so they commute and survive reordering. They are
//! not deduplicated: a caller that records the same event twice over-counts.
//! The coordinator only records transitions it actually committed.

use std::sync::Arc;

use crate::error::AppError;
use crate::models::agent::{AgentStats, StatsDelta};
use crate::models::ids::AgentId;
use crate::store::AgentStatsStore;

#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn AgentStatsStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn AgentStatsStore>) -> Self {
        Self { store }
    }

    pub async fn record_acceptance(&self, agent_id: &AgentId) -> Result<AgentStats, AppError> {
        self.store.increment(agent_id, StatsDelta::Accepted).await
    }

    pub async fn record_pickup(&self, agent_id: &AgentId) -> Result<AgentStats, AppError> {
        self.store.increment(agent_id, StatsDelta::PickedUp).await
    }

    pub async fn record_delivery(
        &self,
        agent_id: &AgentId,
        earning: f64,
        duration_minutes: f64,
    ) -> Result<AgentStats, AppError> {
        if !earning.is_finite() || earning < 0.0 {
            return Err(AppError::BadRequest(format!(
                "earning must be a non-negative amount, got {earning}"
            )));
        }

        self.store
            .increment(
                agent_id,
                StatsDelta::Delivered {
                    earning,
                    duration_minutes: duration_minutes.max(0.0),
                },
            )
            .await
    }

    pub async fn stats(&self, agent_id: &AgentId) -> Result<AgentStats, AppError> {
        Ok(self.store.get(agent_id).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::StatsAggregator;
    use crate::models::ids::AgentId;
    use crate::store::memory::MemoryAgentStatsStore;

    #[tokio::test]
    async fn deliveries_accumulate_earnings_and_average() {
        let stats = StatsAggregator::new(Arc::new(MemoryAgentStatsStore::new()));
        let agent = AgentId::from("A7");

        stats.record_acceptance(&agent).await.unwrap();
        stats.record_pickup(&agent).await.unwrap();
        stats.record_delivery(&agent, 40.0, 25.0).await.unwrap();
        let latest = stats.record_delivery(&agent, 60.0, 35.0).await.unwrap();

        assert_eq!(latest.assigned_orders, 1);
        assert_eq!(latest.completed_pickups, 1);
        assert_eq!(latest.completed_deliveries, 2);
        assert!((latest.total_earnings - 100.0).abs() < 1e-9);
        assert!((latest.average_delivery_time - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_agent_reads_as_zero() {
        let stats = StatsAggregator::new(Arc::new(MemoryAgentStatsStore::new()));
        let read = stats.stats(&AgentId::from("nobody")).await.unwrap();
        assert_eq!(read.completed_deliveries, 0);
    }

    #[tokio::test]
    async fn negative_earnings_are_rejected() {
        let stats = StatsAggregator::new(Arc::new(MemoryAgentStatsStore::new()));
        assert!(
            stats
                .record_delivery(&AgentId::from("A7"), -5.0, 10.0)
                .await
                .is_err()
        );
    }
}
