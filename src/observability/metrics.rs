use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub transition_latency_seconds: HistogramVec,
    pub otp_verifications_total: IntCounterVec,
    pub otp_challenges_expired_total: IntCounter,
    pub notifications_failed_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "transitions_total",
                "Coordinator operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid transitions_total metric");

        let transition_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "transition_latency_seconds",
                "Latency of coordinator operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid transition_latency_seconds metric");

        let otp_verifications_total = IntCounterVec::new(
            Opts::new("otp_verifications_total", "OTP verification attempts by outcome"),
            &["outcome"],
        )
        .expect("valid otp_verifications_total metric");

        let otp_challenges_expired_total = IntCounter::new(
            "otp_challenges_expired_total",
            "OTP challenges expired by the background sweep",
        )
        .expect("valid otp_challenges_expired_total metric");

        let notifications_failed_total = IntCounterVec::new(
            Opts::new(
                "notifications_failed_total",
                "Notifications that failed or timed out, by channel",
            ),
            &["channel"],
        )
        .expect("valid notifications_failed_total metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(transition_latency_seconds.clone()))
            .expect("register transition_latency_seconds");
        registry
            .register(Box::new(otp_verifications_total.clone()))
            .expect("register otp_verifications_total");
        registry
            .register(Box::new(otp_challenges_expired_total.clone()))
            .expect("register otp_challenges_expired_total");
        registry
            .register(Box::new(notifications_failed_total.clone()))
            .expect("register notifications_failed_total");

        Self {
            registry,
            transitions_total,
            transition_latency_seconds,
            otp_verifications_total,
            otp_challenges_expired_total,
            notifications_failed_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn registries_are_per_instance() {
        let first = Metrics::new();
        let second = Metrics::new();

        first
            .transitions_total
            .with_label_values(&["accept", "ok"])
            .inc();

        assert_eq!(
            first
                .transitions_total
                .with_label_values(&["accept", "ok"])
                .get(),
            1
        );
        assert_eq!(
            second
                .transitions_total
                .with_label_values(&["accept", "ok"])
                .get(),
            0
        );
        assert!(first.encode().unwrap().contains("transitions_total"));
    }
}
