use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::AppError;
use crate::models::ids::OrderId;

/// Sliding-window cap on OTP issuance per order. Owned by one `OtpService`.
#[derive(Debug)]
pub struct IssueRateLimiter {
    limit: usize,
    window: Duration,
    issued: DashMap<OrderId, VecDeque<DateTime<Utc>>>,
}

impl IssueRateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            issued: DashMap::new(),
        }
    }

    pub fn check(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut issued = self.issued.entry(order_id).or_default();
        let cutoff = now - self.window;
        while issued.front().is_some_and(|at| *at <= cutoff) {
            issued.pop_front();
        }

        if issued.len() >= self.limit {
            return Err(AppError::RateLimited(format!(
                "at most {} codes per {} minutes for one order",
                self.limit,
                self.window.num_minutes()
            )));
        }

        issued.push_back(now);
        Ok(())
    }

    /// Drops windows with no issuance newer than `now - window`.
    pub fn purge(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let before = self.issued.len();
        self.issued
            .retain(|_, issued| issued.back().is_some_and(|at| *at > cutoff));
        before - self.issued.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::IssueRateLimiter;
    use crate::error::AppError;
    use crate::models::ids::OrderId;

    #[test]
    fn limit_applies_per_order_within_window() {
        let limiter = IssueRateLimiter::new(2, Duration::minutes(15));
        let order = OrderId::new();
        let other = OrderId::new();
        let now = Utc::now();

        assert!(limiter.check(order, now).is_ok());
        assert!(limiter.check(order, now).is_ok());
        assert!(matches!(
            limiter.check(order, now),
            Err(AppError::RateLimited(_))
        ));
        assert!(limiter.check(other, now).is_ok());

        assert!(limiter.check(order, now + Duration::minutes(16)).is_ok());
    }

    #[test]
    fn purge_drops_idle_windows() {
        let limiter = IssueRateLimiter::new(2, Duration::minutes(15));
        let now = Utc::now();
        limiter.check(OrderId::new(), now).unwrap();

        assert_eq!(limiter.purge(now), 0);
        assert_eq!(limiter.purge(now + Duration::minutes(20)), 1);
    }
}
