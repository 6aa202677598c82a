use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::agent::GeoPoint;
use crate::models::ids::{AgentId, OrderId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdminApprovalStatus {
    Pending,
    Approved,
    AutoApproved,
    Rejected,
}

impl AdminApprovalStatus {
    pub fn permits_assignment(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }
}

/// Coarse lifecycle shown to buyers and sellers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    PickupReady,
    OutForDelivery,
    Delivered,
    Cancelled,
}

/// Fine-grained assignment state owned by the coordinator.
///
/// A committed rejection lands back on `Unassigned`; the last rejection is kept
/// in [`DeliveryAssignment::rejected_at`] and [`DeliveryAssignment::rejection_reason`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AssignmentStatus {
    #[default]
    Unassigned,
    Assigned,
    Accepted,
    PickupCompleted,
    DeliveryCompleted,
}

impl AssignmentStatus {
    pub fn is_accepted_or_later(self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::PickupCompleted | Self::DeliveryCompleted
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMethod {
    Prepaid,
    CashOnDelivery,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CodMethod {
    Cash,
    Upi,
    Card,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodPayment {
    pub amount: f64,
    pub method: CodMethod,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuyerContact {
    pub user_id: UserId,
    pub phone: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAssignment {
    pub agent_id: Option<AgentId>,
    pub status: AssignmentStatus,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PickupRecord {
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub completed_by: Option<AgentId>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRecord {
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub recipient_name: Option<String>,
    pub location: Option<GeoPoint>,
    pub cod_payment: Option<CodPayment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRecord {
    pub id: OrderId,
    pub order_number: String,
    pub seller_id: String,
    pub buyer: BuyerContact,
    pub payment_method: PaymentMethod,
    pub total_price: f64,
    pub delivery_fee: f64,
    pub requires_delivery_otp: bool,
    pub admin_approval: AdminApprovalStatus,
    pub status: OrderStatus,
    pub assignment: DeliveryAssignment,
    pub pickup: PickupRecord,
    pub delivery: DeliveryRecord,
    pub cancellation: Option<Cancellation>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order as handed over by order placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_number: String,
    pub seller_id: String,
    pub buyer: BuyerContact,
    pub payment_method: PaymentMethod,
    pub total_price: f64,
    pub delivery_fee: f64,
    pub requires_delivery_otp: bool,
    #[serde(default)]
    pub admin_approval: Option<AdminApprovalStatus>,
}

/// A single mutation of an order. Applied by the store under its per-order
/// lock, after the expectation the caller read has been re-checked.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    SetApproval {
        status: AdminApprovalStatus,
        at: DateTime<Utc>,
    },
    Assign {
        agent_id: AgentId,
        at: DateTime<Utc>,
    },
    Accept {
        at: DateTime<Utc>,
    },
    Reject {
        reason: String,
        at: DateTime<Utc>,
    },
    CompletePickup {
        agent_id: AgentId,
        notes: Option<String>,
        location: Option<GeoPoint>,
        at: DateTime<Utc>,
    },
    CompleteDelivery {
        recipient_name: String,
        notes: Option<String>,
        location: Option<GeoPoint>,
        cod_payment: Option<CodPayment>,
        at: DateTime<Utc>,
    },
    Cancel {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl Transition {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Transition::SetApproval { at, .. }
            | Transition::Assign { at, .. }
            | Transition::Accept { at }
            | Transition::Reject { at, .. }
            | Transition::CompletePickup { at, .. }
            | Transition::CompleteDelivery { at, .. }
            | Transition::Cancel { at, .. } => *at,
        }
    }
}

impl OrderRecord {
    pub fn new(id: OrderId, order: NewOrder, now: DateTime<Utc>) -> Self {
        let admin_approval = order.admin_approval.unwrap_or(AdminApprovalStatus::Pending);

        Self {
            id,
            order_number: order.order_number.trim().to_string(),
            seller_id: order.seller_id,
            buyer: order.buyer,
            payment_method: order.payment_method,
            total_price: order.total_price,
            delivery_fee: order.delivery_fee,
            requires_delivery_otp: order.requires_delivery_otp,
            admin_approval,
            status: status_for_approval(admin_approval),
            assignment: DeliveryAssignment::default(),
            pickup: PickupRecord::default(),
            delivery: DeliveryRecord::default(),
            cancellation: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    pub fn is_assigned_to(&self, agent_id: &AgentId) -> bool {
        self.assignment.agent_id.as_ref() == Some(agent_id)
    }

    pub fn apply(&mut self, transition: &Transition) {
        match transition {
            Transition::SetApproval { status, .. } => {
                self.admin_approval = *status;
                self.status = status_for_approval(*status);
            }
            Transition::Assign { agent_id, at } => {
                self.assignment.agent_id = Some(agent_id.clone());
                self.assignment.status = AssignmentStatus::Assigned;
                self.assignment.assigned_at = Some(*at);
                self.assignment.accepted_at = None;
                self.status = OrderStatus::Processing;
            }
            Transition::Accept { at } => {
                self.assignment.status = AssignmentStatus::Accepted;
                self.assignment.accepted_at = Some(*at);
                self.status = OrderStatus::PickupReady;
            }
            Transition::Reject { reason, at } => {
                self.assignment.agent_id = None;
                self.assignment.assigned_at = None;
                self.assignment.status = AssignmentStatus::Unassigned;
                self.assignment.rejected_at = Some(*at);
                self.assignment.rejection_reason = Some(reason.clone());
                self.status = OrderStatus::Processing;
            }
            Transition::CompletePickup {
                agent_id,
                notes,
                location,
                at,
            } => {
                self.pickup = PickupRecord {
                    is_completed: true,
                    completed_at: Some(*at),
                    notes: notes.clone(),
                    completed_by: Some(agent_id.clone()),
                    location: location.clone(),
                };
                self.assignment.status = AssignmentStatus::PickupCompleted;
                self.status = OrderStatus::OutForDelivery;
            }
            Transition::CompleteDelivery {
                recipient_name,
                notes,
                location,
                cod_payment,
                at,
            } => {
                self.delivery = DeliveryRecord {
                    is_completed: true,
                    completed_at: Some(*at),
                    notes: notes.clone(),
                    recipient_name: Some(recipient_name.clone()),
                    location: location.clone(),
                    cod_payment: cod_payment.clone(),
                };
                self.assignment.status = AssignmentStatus::DeliveryCompleted;
                self.status = OrderStatus::Delivered;
            }
            Transition::Cancel { reason, at } => {
                self.cancellation = Some(Cancellation {
                    reason: reason.clone(),
                    cancelled_at: *at,
                });
                self.status = OrderStatus::Cancelled;
            }
        }

        self.version += 1;
        self.updated_at = transition.at();
    }

    /// Projection handed to delivery agents. `None` unless `agent_id` holds the
    /// assignment; the order number stays hidden until the assignment is accepted.
    pub fn view_for_agent(&self, agent_id: &AgentId) -> Option<AgentOrderView> {
        if !self.is_assigned_to(agent_id) {
            return None;
        }

        let order_number = self
            .assignment
            .status
            .is_accepted_or_later()
            .then(|| self.order_number.clone());

        Some(AgentOrderView {
            order_id: self.id,
            order_number,
            status: self.status,
            assignment_status: self.assignment.status,
            payment_method: self.payment_method,
            total_price: self.total_price,
            delivery_fee: self.delivery_fee,
            requires_delivery_otp: self.requires_delivery_otp,
            pickup_completed: self.pickup.is_completed,
            delivery_completed: self.delivery.is_completed,
        })
    }
}

fn status_for_approval(approval: AdminApprovalStatus) -> OrderStatus {
    if approval.permits_assignment() {
        OrderStatus::Processing
    } else {
        OrderStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOrderView {
    pub order_id: OrderId,
    pub order_number: Option<String>,
    pub status: OrderStatus,
    pub assignment_status: AssignmentStatus,
    pub payment_method: PaymentMethod,
    pub total_price: f64,
    pub delivery_fee: f64,
    pub requires_delivery_otp: bool,
    pub pickup_completed: bool,
    pub delivery_completed: bool,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn order() -> OrderRecord {
        OrderRecord::new(
            OrderId::new(),
            NewOrder {
                order_number: "  ORD1001 ".to_string(),
                seller_id: "seller-1".to_string(),
                buyer: BuyerContact {
                    user_id: UserId::from("buyer-1"),
                    phone: "+910000000001".to_string(),
                    language: "en".to_string(),
                },
                payment_method: PaymentMethod::Prepaid,
                total_price: 1299.0,
                delivery_fee: 40.0,
                requires_delivery_otp: true,
                admin_approval: Some(AdminApprovalStatus::Approved),
            },
            Utc::now(),
        )
    }

    #[test]
    fn new_order_trims_number_and_starts_unassigned() {
        let order = order();
        assert_eq!(order.order_number, "ORD1001");
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.assignment.status, AssignmentStatus::Unassigned);
        assert_eq!(order.version, 0);
    }

    #[test]
    fn unapproved_order_stays_pending() {
        let mut order = order();
        order.apply(&Transition::SetApproval {
            status: AdminApprovalStatus::Pending,
            at: Utc::now(),
        });
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(!order.admin_approval.permits_assignment());
    }

    #[test]
    fn reject_clears_agent_and_keeps_reason() {
        let mut order = order();
        let agent = AgentId::from("A7");
        order.apply(&Transition::Assign {
            agent_id: agent.clone(),
            at: Utc::now(),
        });
        order.apply(&Transition::Reject {
            reason: "vehicle breakdown".to_string(),
            at: Utc::now(),
        });

        assert_eq!(order.assignment.status, AssignmentStatus::Unassigned);
        assert!(order.assignment.agent_id.is_none());
        assert!(order.assignment.assigned_at.is_none());
        assert_eq!(
            order.assignment.rejection_reason.as_deref(),
            Some("vehicle breakdown")
        );
        assert_eq!(order.version, 2);
    }

    #[test]
    fn pickup_moves_order_out_for_delivery() {
        let mut order = order();
        let agent = AgentId::from("A7");
        order.apply(&Transition::Assign {
            agent_id: agent.clone(),
            at: Utc::now(),
        });
        order.apply(&Transition::Accept { at: Utc::now() });
        order.apply(&Transition::CompletePickup {
            agent_id: agent.clone(),
            notes: None,
            location: None,
            at: Utc::now(),
        });

        assert_eq!(order.status, OrderStatus::OutForDelivery);
        assert!(order.pickup.is_completed);
        assert_eq!(order.pickup.completed_by, Some(agent));
    }

    #[test]
    fn agent_view_hides_order_number_until_accepted() {
        let mut order = order();
        let agent = AgentId::from("A7");
        assert!(order.view_for_agent(&agent).is_none());

        order.apply(&Transition::Assign {
            agent_id: agent.clone(),
            at: Utc::now(),
        });
        let view = order.view_for_agent(&agent).unwrap();
        assert!(view.order_number.is_none());
        assert!(order.view_for_agent(&AgentId::from("A9")).is_none());

        order.apply(&Transition::Accept { at: Utc::now() });
        let view = order.view_for_agent(&agent).unwrap();
        assert_eq!(view.order_number.as_deref(), Some("ORD1001"));
    }
}
