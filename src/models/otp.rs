use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::{AgentId, ChallengeId, OrderId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OtpPurpose {
    DeliveryConfirmation,
    PickupConfirmation,
    PaymentConfirmation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OtpStatus {
    Pending,
    Verified,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OtpChallenge {
    pub id: ChallengeId,
    #[serde(skip_serializing)]
    pub code: String,
    pub order_id: OrderId,
    pub agent_id: AgentId,
    pub user_id: UserId,
    pub purpose: OtpPurpose,
    pub status: OtpStatus,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// What a single `verify` call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Mismatch { remaining_attempts: u32 },
    Expired,
    Exhausted,
    AlreadyVerified,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Replacement state to persist, `None` when nothing changes.
    pub next: Option<OtpChallenge>,
    pub verdict: Verdict,
}

impl OtpChallenge {
    pub fn new(
        order_id: OrderId,
        agent_id: AgentId,
        user_id: UserId,
        purpose: OtpPurpose,
        code: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: ChallengeId::new(),
            code,
            order_id,
            agent_id,
            user_id,
            purpose,
            status: OtpStatus::Pending,
            attempt_count: 0,
            created_at: now,
            expires_at: now + ttl,
            verified_at: None,
            version: 0,
        }
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Decides the outcome of entering `entered` at `now`.
    ///
    /// Time expiry is checked before the attempt counter moves, so a late
    /// attempt never consumes an attempt. A challenge that was exhausted keeps
    /// reporting exhaustion even after its expiry time passes.
    pub fn evaluate(&self, entered: &str, now: DateTime<Utc>, max_attempts: u32) -> Evaluation {
        match self.status {
            OtpStatus::Verified => return unchanged(Verdict::AlreadyVerified),
            OtpStatus::Cancelled => return unchanged(Verdict::Cancelled),
            OtpStatus::Expired if self.attempt_count >= max_attempts => {
                return unchanged(Verdict::Exhausted);
            }
            OtpStatus::Expired => return unchanged(Verdict::Expired),
            OtpStatus::Pending => {}
        }

        let mut next = self.clone();

        if self.is_past_expiry(now) {
            next.status = OtpStatus::Expired;
            return Evaluation {
                next: Some(next),
                verdict: Verdict::Expired,
            };
        }

        next.attempt_count += 1;

        let verdict = if entered == self.code {
            next.status = OtpStatus::Verified;
            next.verified_at = Some(now);
            Verdict::Verified
        } else if next.attempt_count >= max_attempts {
            next.status = OtpStatus::Expired;
            Verdict::Exhausted
        } else {
            Verdict::Mismatch {
                remaining_attempts: max_attempts - next.attempt_count,
            }
        };

        Evaluation {
            next: Some(next),
            verdict,
        }
    }
}

fn unchanged(verdict: Verdict) -> Evaluation {
    Evaluation {
        next: None,
        verdict,
    }
}
