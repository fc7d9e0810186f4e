use std::sync::Arc;

use crate::{
    config::Config,
    error::RuntimeError,
    events::Bus,
    faults::FaultInjector,
    node::Owner,
    subscribers::{Subscribe, SubscriberSet},
};
use super::{gateway::SignalGateway, shared::Shared, supervisor::Supervisor};

/// Builder for constructing a Supervisor with optional features.
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    faults: Option<FaultInjector>,
    signals: bool,
    owner: String,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            faults: None,
            signals: false,
            owner: "supervisor".to_string(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets fault rules. Without this, rules are read from `PILOT_RAISE_ON_*`.
    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Installs the process-wide [`SignalGateway`] on build.
    pub fn with_signal_gateway(mut self) -> Self {
        self.signals = true;
        self
    }

    /// Names the root owner (appears in ownership errors).
    pub fn with_owner_name(mut self, name: impl Into<String>) -> Self {
        self.owner = name.into();
        self
    }

    /// Builds the supervisor. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// [`RuntimeError::Gateway`] if a signal gateway was requested and cannot be installed.
    pub fn build(self) -> Result<Supervisor, RuntimeError> {
        let gateway = if self.signals {
            Some(SignalGateway::install()?)
        } else {
            None
        };
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let faults = self.faults.unwrap_or_else(FaultInjector::from_env);
        let shared = Arc::new(Shared::new(self.cfg, bus, faults));

        Ok(Supervisor::new_internal(
            shared,
            Owner::new(self.owner),
            subs,
            gateway,
        ))
    }
}
