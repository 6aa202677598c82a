use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info};

use crate::otp::OtpService;

pub async fn run_expiry_sweep(otp: Arc<OtpService>, period: Duration) {
    info!(period_secs = period.as_secs(), "otp expiry sweep started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match otp.sweep_expired().await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "expired stale otp challenges"),
            Err(err) => error!(error = %err, "otp expiry sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::time::Duration;

    use super::run_expiry_sweep;
    use crate::clock::ManualClock;
    use crate::models::ids::{AgentId, OrderId, UserId};
    use crate::models::otp::{OtpPurpose, OtpStatus};
    use crate::observability::metrics::Metrics;
    use crate::otp::channel::OutboxCodeSender;
    use crate::otp::code::RandomCodeGenerator;
    use crate::otp::{IssueRequest, OtpPolicy, OtpService};
    use crate::store::memory::MemoryOtpStore;

    #[tokio::test]
    async fn background_sweep_expires_stale_challenges() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let otp = Arc::new(OtpService::new(
            Arc::new(MemoryOtpStore::new()),
            Arc::new(OutboxCodeSender::new()),
            Arc::new(RandomCodeGenerator),
            clock.clone(),
            OtpPolicy::default(),
            Metrics::new(),
        ));

        let order_id = OrderId::new();
        let challenge = otp
            .issue(IssueRequest {
                order_id,
                agent_id: AgentId::from("A7"),
                user_id: UserId::from("buyer-1"),
                purpose: OtpPurpose::DeliveryConfirmation,
                phone: "+911234567890".to_string(),
                language: "en".to_string(),
            })
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(15));
        let sweep = tokio::spawn(run_expiry_sweep(otp.clone(), Duration::from_millis(10)));

        let mut expired = false;
        for _ in 0..100 {
            if otp.challenge(challenge.id).await.unwrap().status == OtpStatus::Expired {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweep.abort();

        assert!(expired, "sweep never expired the stale challenge");
    }
}
