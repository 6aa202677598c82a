pub mod channel;
pub mod code;
pub mod limiter;
pub mod sweep;

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::AppError;
use crate::models::ids::{AgentId, ChallengeId, OrderId, UserId};
use crate::models::otp::{OtpChallenge, OtpPurpose, OtpStatus, Verdict};
use crate::observability::metrics::Metrics;
use crate::store::{CasResult, OtpStore};

use self::channel::{CodeSender, mask_phone};
use self::code::CodeGenerator;
use self::limiter::IssueRateLimiter;

#[derive(Debug, Clone, Copy)]
pub struct OtpPolicy {
    pub ttl: Duration,
    /// The one place the attempt limit lives.
    pub max_attempts: u32,
    pub issue_limit: usize,
    pub issue_window: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(10),
            max_attempts: 3,
            issue_limit: 5,
            issue_window: Duration::minutes(15),
        }
    }
}

impl OtpPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: Duration::seconds(config.otp_ttl_seconds),
            max_attempts: config.otp_max_attempts,
            issue_limit: config.otp_issue_limit,
            issue_window: Duration::seconds(config.otp_issue_window_seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub order_id: OrderId,
    pub agent_id: AgentId,
    pub user_id: UserId,
    pub purpose: OtpPurpose,
    pub phone: String,
    pub language: String,
}

pub struct OtpService {
    store: Arc<dyn OtpStore>,
    sender: Arc<dyn CodeSender>,
    generator: Arc<dyn CodeGenerator>,
    limiter: IssueRateLimiter,
    clock: Arc<dyn Clock>,
    policy: OtpPolicy,
    metrics: Metrics,
}

impl OtpService {
    pub fn new(
        store: Arc<dyn OtpStore>,
        sender: Arc<dyn CodeSender>,
        generator: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        policy: OtpPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            sender,
            generator,
            limiter: IssueRateLimiter::new(policy.issue_limit, policy.issue_window),
            clock,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> OtpPolicy {
        self.policy
    }

    /// Issues a fresh challenge for (order, purpose), superseding any pending
    /// one, and hands the code to the SMS channel. A code that cannot be sent
    /// is cancelled rather than left pending.
    pub async fn issue(&self, request: IssueRequest) -> Result<OtpChallenge, AppError> {
        if request.phone.trim().is_empty() {
            return Err(AppError::BadRequest(
                "recipient phone number is missing".to_string(),
            ));
        }

        let now = self.clock.now();
        self.limiter.check(request.order_id, now)?;

        let challenge = OtpChallenge::new(
            request.order_id,
            request.agent_id.clone(),
            request.user_id.clone(),
            request.purpose,
            self.generator.generate(),
            now,
            self.policy.ttl,
        );

        if let Some(previous) = self.store.replace_pending(challenge.clone()).await? {
            info!(
                order_id = %request.order_id,
                challenge_id = %previous,
                "superseded pending otp challenge"
            );
        }

        if let Err(err) = self
            .sender
            .send_code(
                &request.phone,
                &challenge.code,
                request.purpose,
                &request.language,
            )
            .await
        {
            warn!(
                order_id = %request.order_id,
                challenge_id = %challenge.id,
                phone = %mask_phone(&request.phone),
                error = %err,
                "otp delivery failed; cancelling challenge"
            );
            if let Err(cancel_err) = self.cancel(challenge.id).await {
                warn!(challenge_id = %challenge.id, error = %cancel_err, "failed to cancel undeliverable challenge");
            }
            return Err(match err {
                AppError::DeliveryChannel(_) => err,
                other => AppError::DeliveryChannel(other.to_string()),
            });
        }

        info!(
            order_id = %challenge.order_id,
            challenge_id = %challenge.id,
            purpose = ?challenge.purpose,
            expires_at = %challenge.expires_at,
            "otp challenge issued"
        );
        Ok(challenge)
    }

    /// Checks `code` against the challenge. Unknown ids fail without touching
    /// any state.
    pub async fn verify(
        &self,
        challenge_id: ChallengeId,
        code: &str,
    ) -> Result<OtpChallenge, AppError> {
        let mut retried = false;

        loop {
            let Some(current) = self.store.get(challenge_id).await? else {
                self.count("not_found");
                return Err(AppError::NotFound(format!(
                    "otp challenge {challenge_id} not found"
                )));
            };

            let evaluation = current.evaluate(code, self.clock.now(), self.policy.max_attempts);
            let verdict = evaluation.verdict;

            let persisted = match evaluation.next {
                None => current,
                Some(mut next) => match self.store.update(next.clone(), current.version).await? {
                    CasResult::Success => {
                        next.version = current.version + 1;
                        next
                    }
                    CasResult::VersionConflict { actual } if !retried => {
                        debug!(challenge_id = %challenge_id, actual, "otp update raced; retrying");
                        retried = true;
                        continue;
                    }
                    CasResult::VersionConflict { .. } => {
                        self.count("conflict");
                        return Err(AppError::Conflict(format!(
                            "otp challenge {challenge_id} changed concurrently"
                        )));
                    }
                    CasResult::NotFound => {
                        self.count("not_found");
                        return Err(AppError::NotFound(format!(
                            "otp challenge {challenge_id} not found"
                        )));
                    }
                },
            };

            return self.conclude(verdict, persisted);
        }
    }

    /// Confirms the latest challenge issued for (order, purpose). A challenge
    /// already verified through `verify` counts as confirmed, so `code` may be
    /// omitted in that case. Single use is enforced by the caller's transition.
    pub async fn verify_active(
        &self,
        order_id: OrderId,
        purpose: OtpPurpose,
        code: Option<&str>,
    ) -> Result<OtpChallenge, AppError> {
        let code = code.filter(|code| !code.is_empty());

        let Some(challenge) = self.store.find_latest(order_id, purpose).await? else {
            return Err(match code {
                None => AppError::VerificationMismatch("otp code is required".to_string()),
                Some(_) => {
                    AppError::InvalidState(format!("no otp challenge issued for order {order_id}"))
                }
            });
        };

        if challenge.status == OtpStatus::Verified {
            debug!(challenge_id = %challenge.id, order_id = %order_id, "otp already verified");
            return Ok(challenge);
        }

        let code = code.ok_or_else(|| {
            AppError::VerificationMismatch("otp code is required".to_string())
        })?;
        self.verify(challenge.id, code).await
    }

    pub async fn active(
        &self,
        order_id: OrderId,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpChallenge>, AppError> {
        self.store.find_active(order_id, purpose).await
    }

    pub async fn challenge(&self, challenge_id: ChallengeId) -> Result<OtpChallenge, AppError> {
        self.store
            .get(challenge_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("otp challenge {challenge_id} not found")))
    }

    /// Housekeeping only; `verify` re-checks expiry on its own.
    pub async fn sweep_expired(&self) -> Result<usize, AppError> {
        let now = self.clock.now();
        let expired = self.store.expire_stale(now).await?;
        let purged = self.limiter.purge(now);

        self.metrics
            .otp_challenges_expired_total
            .inc_by(expired as u64);
        if purged > 0 {
            debug!(purged, "purged idle otp rate-limit windows");
        }
        Ok(expired)
    }

    async fn cancel(&self, challenge_id: ChallengeId) -> Result<(), AppError> {
        let mut retried = false;
        loop {
            let Some(mut challenge) = self.store.get(challenge_id).await? else {
                return Ok(());
            };
            if challenge.status != OtpStatus::Pending {
                return Ok(());
            }

            let expected = challenge.version;
            challenge.status = OtpStatus::Cancelled;
            match self.store.update(challenge, expected).await? {
                CasResult::Success | CasResult::NotFound => return Ok(()),
                CasResult::VersionConflict { .. } if !retried => retried = true,
                CasResult::VersionConflict { .. } => {
                    return Err(AppError::Conflict(format!(
                        "otp challenge {challenge_id} changed concurrently"
                    )));
                }
            }
        }
    }

    fn conclude(&self, verdict: Verdict, challenge: OtpChallenge) -> Result<OtpChallenge, AppError> {
        match verdict {
            Verdict::Verified => {
                self.count("verified");
                info!(
                    challenge_id = %challenge.id,
                    order_id = %challenge.order_id,
                    attempts = challenge.attempt_count,
                    "otp verified"
                );
                Ok(challenge)
            }
            Verdict::Mismatch { remaining_attempts } => {
                self.count("mismatch");
                Err(AppError::VerificationMismatch(format!(
                    "incorrect code, {remaining_attempts} attempt(s) remaining"
                )))
            }
            Verdict::Exhausted => {
                self.count("exhausted");
                warn!(
                    challenge_id = %challenge.id,
                    order_id = %challenge.order_id,
                    "otp attempts exhausted"
                );
                Err(AppError::AttemptsExhausted)
            }
            Verdict::Expired => {
                self.count("expired");
                Err(AppError::Expired)
            }
            Verdict::AlreadyVerified => {
                self.count("already_processed");
                Err(AppError::AlreadyProcessed(
                    "otp challenge already verified".to_string(),
                ))
            }
            Verdict::Cancelled => {
                self.count("already_processed");
                Err(AppError::AlreadyProcessed(
                    "otp challenge was superseded or cancelled".to_string(),
                ))
            }
        }
    }

    fn count(&self, outcome: &str) {
        self.metrics
            .otp_verifications_total
            .with_label_values(&[outcome])
            .inc();
    }
}
