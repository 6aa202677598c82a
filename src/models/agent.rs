use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::{AgentId, OrderId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentAvailability {
    Available,
    Assigned,
    Delivering,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAgentProfile {
    pub id: AgentId,
    pub name: String,
    pub phone: String,
    pub availability: AgentAvailability,
    pub current_order: Option<OrderId>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryAgentProfile {
    pub fn new(id: AgentId, name: String, phone: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            phone,
            availability: AgentAvailability::Available,
            current_order: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentStats {
    pub assigned_orders: u64,
    pub completed_pickups: u64,
    pub completed_deliveries: u64,
    pub total_earnings: f64,
    /// Minutes, averaged over `completed_deliveries`.
    pub average_delivery_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatsDelta {
    Accepted,
    PickedUp,
    Delivered { earning: f64, duration_minutes: f64 },
}

impl AgentStats {
    pub fn apply(&mut self, delta: StatsDelta) {
        match delta {
            StatsDelta::Accepted => self.assigned_orders += 1,
            StatsDelta::PickedUp => self.completed_pickups += 1,
            StatsDelta::Delivered {
                earning,
                duration_minutes,
            } => {
                self.completed_deliveries += 1;
                self.total_earnings += earning;

                let n = self.completed_deliveries as f64;
                self.average_delivery_time =
                    ((self.average_delivery_time * (n - 1.0)) + duration_minutes) / n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentStats, StatsDelta};

    #[test]
    fn average_delivery_time_is_incremental_mean() {
        let mut stats = AgentStats::default();
        for minutes in [30.0, 20.0, 40.0] {
            stats.apply(StatsDelta::Delivered {
                earning: 50.0,
                duration_minutes: minutes,
            });
        }

        assert_eq!(stats.completed_deliveries, 3);
        assert!((stats.average_delivery_time - 30.0).abs() < 1e-9);
        assert!((stats.total_earnings - 150.0).abs() < 1e-9);
    }

    #[test]
    fn counters_are_additive() {
        let mut stats = AgentStats::default();
        stats.apply(StatsDelta::Accepted);
        stats.apply(StatsDelta::Accepted);
        stats.apply(StatsDelta::PickedUp);

        assert_eq!(stats.assigned_orders, 2);
        assert_eq!(stats.completed_pickups, 1);
        assert_eq!(stats.completed_deliveries, 0);
    }
}
