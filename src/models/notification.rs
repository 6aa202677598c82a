use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::{AgentId, OrderId};
use crate::models::order::CodMethod;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Buyer,
    Seller,
    Admin,
    Agent,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Buyer => "buyer",
            Channel::Seller => "seller",
            Channel::Admin => "admin",
            Channel::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    OrderAssigned {
        order_id: OrderId,
        agent_id: AgentId,
        assigned_at: DateTime<Utc>,
    },
    AssignmentAccepted {
        order_id: OrderId,
        order_number: String,
        agent_id: AgentId,
        accepted_at: DateTime<Utc>,
    },
    AssignmentRejected {
        order_id: OrderId,
        order_number: String,
        agent_id: AgentId,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
    PickupCompleted {
        order_id: OrderId,
        order_number: String,
        agent_id: AgentId,
        completed_at: DateTime<Utc>,
    },
    DeliveryCompleted {
        order_id: OrderId,
        order_number: String,
        agent_id: AgentId,
        recipient_name: String,
        completed_at: DateTime<Utc>,
    },
    CodCollected {
        order_id: OrderId,
        order_number: String,
        agent_id: AgentId,
        amount: f64,
        method: CodMethod,
    },
    OrderCancelled {
        order_id: OrderId,
        /// Withheld from an agent who never accepted the order.
        order_number: Option<String>,
        reason: String,
        cancelled_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub channel: Channel,
    /// User, seller or agent id on the channel; `None` for the admin feed.
    pub recipient: Option<String>,
    #[serde(flatten)]
    pub event: DeliveryEvent,
}
