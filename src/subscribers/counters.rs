//! # Event counters.
//!
//! [`Counters`] is a metrics subscriber: one atomic counter per event family,
//! readable at any time through [`Counters::snapshot`]. Share it as an `Arc` and
//! hand a clone to the supervisor builder.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub started: u64,
    pub stopped: u64,
    pub failed: u64,
    pub unsolicited: u64,
    pub forced: u64,
    pub leaked: u64,
    pub published: u64,
    pub forced_cancels: u64,
    pub missing: u64,
}

/// Atomic event counters.
#[derive(Debug, Default)]
pub struct Counters {
    started: AtomicU64,
    stopped: AtomicU64,
    failed: AtomicU64,
    unsolicited: AtomicU64,
    forced: AtomicU64,
    leaked: AtomicU64,
    published: AtomicU64,
    forced_cancels: AtomicU64,
    missing: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            started: get(&self.started),
            stopped: get(&self.stopped),
            failed: get(&self.failed),
            unsolicited: get(&self.unsolicited),
            forced: get(&self.forced),
            leaked: get(&self.leaked),
            published: get(&self.published),
            forced_cancels: get(&self.forced_cancels),
            missing: get(&self.missing),
        }
    }

    fn slot(&self, kind: EventKind) -> Option<&AtomicU64> {
        Some(match kind {
            EventKind::NodeStarting => &self.started,
            EventKind::NodeStopped => &self.stopped,
            EventKind::NodeFailed => &self.failed,
            EventKind::UnsolicitedExit => &self.unsolicited,
            EventKind::ForcedInterrupt => &self.forced,
            EventKind::ChildLeaked => &self.leaked,
            EventKind::JobStateChanged => &self.published,
            EventKind::ForcedCancel => &self.forced_cancels,
            EventKind::JobMissing => &self.missing,
            _ => return None,
        })
    }
}

#[async_trait]
impl Subscribe for Counters {
    async fn on_event(&self, event: &Event) {
        if let Some(c) = self.slot(event.kind) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn name(&self) -> &'static str {
        "counters"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }

    fn accepts(&self, kind: EventKind) -> bool {
        self.slot(kind).is_some()
    }
}
