//! Pure precondition checks for each coordinator operation.
//!
//! A guard either rejects the call with a typed error, reports that the
//! effect is already in place, or produces the conditional update to attempt.
//! None of them touch storage, so a rejected call cannot leave partial state.

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::agent::GeoPoint;
use crate::models::ids::AgentId;
use crate::models::order::{
    AdminApprovalStatus, AssignmentStatus, CodPayment, OrderRecord, OrderStatus, PaymentMethod,
    Transition,
};
use crate::store::Expectation;

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Apply {
        expectation: Expectation,
        transition: Transition,
    },
    Unchanged,
}

impl Plan {
    fn apply(order: &OrderRecord, transition: Transition) -> Self {
        Plan::Apply {
            expectation: Expectation::of(order),
            transition,
        }
    }
}

pub fn ensure_active(order: &OrderRecord) -> Result<(), AppError> {
    if order.is_cancelled() {
        return Err(AppError::InvalidState(format!(
            "order {} is cancelled",
            order.id
        )));
    }
    Ok(())
}

pub fn ensure_owner(order: &OrderRecord, agent_id: &AgentId) -> Result<(), AppError> {
    if !order.is_assigned_to(agent_id) {
        return Err(AppError::NotAssigned);
    }
    Ok(())
}

pub fn plan_approval(
    order: &OrderRecord,
    status: AdminApprovalStatus,
    now: DateTime<Utc>,
) -> Result<Plan, AppError> {
    ensure_active(order)?;
    if order.assignment.status != AssignmentStatus::Unassigned {
        return Err(AppError::InvalidState(format!(
            "approval cannot change while the order is {:?}",
            order.assignment.status
        )));
    }
    if order.admin_approval == status {
        return Ok(Plan::Unchanged);
    }

    Ok(Plan::apply(order, Transition::SetApproval { status, at: now }))
}

pub fn plan_assign(
    order: &OrderRecord,
    agent_id: &AgentId,
    now: DateTime<Utc>,
) -> Result<Plan, AppError> {
    ensure_active(order)?;
    if !order.admin_approval.permits_assignment() {
        return Err(AppError::InvalidState(format!(
            "order is not approved for delivery (approval {:?})",
            order.admin_approval
        )));
    }
    if order.assignment.status != AssignmentStatus::Unassigned {
        return Err(AppError::InvalidState(format!(
            "order is already {:?}",
            order.assignment.status
        )));
    }

    Ok(Plan::apply(
        order,
        Transition::Assign {
            agent_id: agent_id.clone(),
            at: now,
        },
    ))
}

/// Re-accepting an order the same agent already accepted is a no-op.
pub fn plan_accept(
    order: &OrderRecord,
    agent_id: &AgentId,
    now: DateTime<Utc>,
) -> Result<Plan, AppError> {
    ensure_active(order)?;
    ensure_owner(order, agent_id)?;

    match order.assignment.status {
        AssignmentStatus::Assigned => Ok(Plan::apply(order, Transition::Accept { at: now })),
        AssignmentStatus::Accepted => Ok(Plan::Unchanged),
        AssignmentStatus::PickupCompleted | AssignmentStatus::DeliveryCompleted => {
            Err(AppError::AlreadyProcessed(format!(
                "assignment already moved on to {:?}",
                order.assignment.status
            )))
        }
        AssignmentStatus::Unassigned => Err(AppError::NotAssigned),
    }
}

pub fn plan_reject(
    order: &OrderRecord,
    agent_id: &AgentId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Plan, AppError> {
    ensure_active(order)?;
    ensure_owner(order, agent_id)?;

    match order.assignment.status {
        AssignmentStatus::Assigned => Ok(Plan::apply(
            order,
            Transition::Reject {
                reason: reason.to_string(),
                at: now,
            },
        )),
        AssignmentStatus::Unassigned => Err(AppError::NotAssigned),
        status => Err(AppError::AlreadyProcessed(format!(
            "assignment is already {status:?}"
        ))),
    }
}

pub fn check_pickup(order: &OrderRecord, agent_id: &AgentId) -> Result<(), AppError> {
    ensure_active(order)?;
    ensure_owner(order, agent_id)?;

    match order.assignment.status {
        AssignmentStatus::Accepted => Ok(()),
        AssignmentStatus::PickupCompleted | AssignmentStatus::DeliveryCompleted => Err(
            AppError::AlreadyCompleted("pickup already completed".to_string()),
        ),
        status => Err(AppError::InvalidState(format!(
            "pickup requires an accepted assignment, order is {status:?}"
        ))),
    }
}

/// Compares the agent-supplied order number after trimming surrounding
/// whitespace. Case-sensitive. The error never echoes the expected number.
pub fn verify_order_number(order: &OrderRecord, supplied: &str) -> Result<(), AppError> {
    if supplied.trim() != order.order_number {
        return Err(AppError::VerificationMismatch(
            "order number does not match this order".to_string(),
        ));
    }
    Ok(())
}

pub fn plan_pickup(
    order: &OrderRecord,
    agent_id: &AgentId,
    supplied_order_number: &str,
    notes: Option<String>,
    location: Option<GeoPoint>,
    now: DateTime<Utc>,
) -> Result<Plan, AppError> {
    check_pickup(order, agent_id)?;
    verify_order_number(order, supplied_order_number)?;

    Ok(Plan::apply(
        order,
        Transition::CompletePickup {
            agent_id: agent_id.clone(),
            notes,
            location,
            at: now,
        },
    ))
}

pub fn check_delivery(order: &OrderRecord, agent_id: &AgentId) -> Result<(), AppError> {
    ensure_active(order)?;
    ensure_owner(order, agent_id)?;

    match order.assignment.status {
        AssignmentStatus::PickupCompleted => Ok(()),
        AssignmentStatus::DeliveryCompleted => Err(AppError::AlreadyCompleted(
            "delivery already completed".to_string(),
        )),
        status => Err(AppError::InvalidState(format!(
            "delivery requires a completed pickup, order is {status:?}"
        ))),
    }
}

pub fn validate_cod(order: &OrderRecord, cod: Option<&CodPayment>) -> Result<(), AppError> {
    match (order.payment_method, cod) {
        (PaymentMethod::CashOnDelivery, None) => Err(AppError::BadRequest(
            "cash on delivery orders need the collected payment".to_string(),
        )),
        (PaymentMethod::Prepaid, Some(_)) => Err(AppError::BadRequest(
            "prepaid orders do not collect cash on delivery".to_string(),
        )),
        (_, Some(payment)) if !payment.amount.is_finite() || payment.amount < 0.0 => Err(
            AppError::BadRequest("collected amount must be non-negative".to_string()),
        ),
        _ => Ok(()),
    }
}

pub struct DeliveryPlan<'a> {
    pub recipient_name: &'a str,
    pub notes: Option<&'a str>,
    pub location: Option<&'a GeoPoint>,
    pub cod_payment: Option<&'a CodPayment>,
}

pub fn plan_delivery(
    order: &OrderRecord,
    agent_id: &AgentId,
    details: &DeliveryPlan<'_>,
    now: DateTime<Utc>,
) -> Result<Plan, AppError> {
    check_delivery(order, agent_id)?;
    validate_cod(order, details.cod_payment)?;

    Ok(Plan::apply(
        order,
        Transition::CompleteDelivery {
            recipient_name: details.recipient_name.to_string(),
            notes: details.notes.map(str::to_string),
            location: details.location.cloned(),
            cod_payment: details.cod_payment.cloned(),
            at: now,
        },
    ))
}

pub fn check_otp_issue(order: &OrderRecord, agent_id: &AgentId) -> Result<(), AppError> {
    check_delivery(order, agent_id)?;
    if !order.requires_delivery_otp {
        return Err(AppError::InvalidState(
            "order does not require a delivery otp".to_string(),
        ));
    }
    Ok(())
}

pub fn plan_cancel(order: &OrderRecord, reason: &str, now: DateTime<Utc>) -> Result<Plan, AppError> {
    match order.status {
        OrderStatus::Cancelled => Err(AppError::AlreadyProcessed(
            "order is already cancelled".to_string(),
        )),
        OrderStatus::Delivered => Err(AppError::AlreadyCompleted(
            "order was already delivered".to_string(),
        )),
        _ => Ok(Plan::apply(
            order,
            Transition::Cancel {
                reason: reason.to_string(),
                at: now,
            },
        )),
    }
}
