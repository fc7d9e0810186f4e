use crate::config::Config;
use crate::events::Bus;
use crate::faults::FaultInjector;

/// State shared by every node of one supervisor tree.
pub(crate) struct Shared {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) faults: FaultInjector,
}

impl Shared {
    pub(crate) fn new(cfg: Config, bus: Bus, faults: FaultInjector) -> Self {
        Self { cfg, bus, faults }
    }
}
