use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::coordinator::DeliveryCoordinator;
use crate::notify::{BroadcastDispatcher, NotificationDispatcher, Notifier};
use crate::observability::metrics::Metrics;
use crate::otp::channel::{CodeSender, LogCodeSender};
use crate::otp::code::{CodeGenerator, RandomCodeGenerator};
use crate::otp::{OtpPolicy, OtpService};
use crate::stats::StatsAggregator;
use crate::store::memory::{
    MemoryAgentStatsStore, MemoryAgentStore, MemoryOrderStore, MemoryOtpStore,
};

/// External edges of the service. Tests swap these for deterministic ones.
pub struct Collaborators {
    pub code_sender: Arc<dyn CodeSender>,
    pub code_generator: Arc<dyn CodeGenerator>,
    pub clock: Arc<dyn Clock>,
    /// Replaces the websocket broadcast as the notification sink when set.
    pub dispatcher: Option<Arc<dyn NotificationDispatcher>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            code_sender: Arc::new(LogCodeSender),
            code_generator: Arc::new(RandomCodeGenerator),
            clock: Arc::new(SystemClock),
            dispatcher: None,
        }
    }
}

pub struct AppState {
    pub coordinator: DeliveryCoordinator,
    pub events: BroadcastDispatcher,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: &Config, collaborators: Collaborators) -> Self {
        let metrics = Metrics::new();
        let events = BroadcastDispatcher::new(config.event_buffer_size);

        let dispatcher: Arc<dyn NotificationDispatcher> = match collaborators.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(events.clone()),
        };
        let notifier = Notifier::new(
            dispatcher,
            Duration::from_millis(config.notify_timeout_ms),
            metrics.clone(),
        );

        let otp = Arc::new(OtpService::new(
            Arc::new(MemoryOtpStore::new()),
            collaborators.code_sender,
            collaborators.code_generator,
            collaborators.clock.clone(),
            OtpPolicy::from_config(config),
            metrics.clone(),
        ));

        let coordinator = DeliveryCoordinator::new(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(MemoryAgentStore::new()),
            otp,
            StatsAggregator::new(Arc::new(MemoryAgentStatsStore::new())),
            notifier,
            collaborators.clock,
            metrics.clone(),
        );

        Self {
            coordinator,
            events,
            metrics,
        }
    }
}
