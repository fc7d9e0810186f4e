//! # Runtime events emitted by nodes, escalation, and the remote tracker.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Node lifecycle**: starting, stopped, failed, stop requested
//! - **Termination control**: unsolicited exits, forced interrupts, leaks, signal arming
//! - **Remote jobs**: submission, terminal publication, cancel requests, forced cancels
//! - **Subscriber health**: overflow and panics
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use pilotvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::GraceExceeded)
//!     .with_node("agent.worker.1")
//!     .with_reason("still running")
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::GraceExceeded);
//! assert_eq!(ev.node.as_deref(), Some("agent.worker.1"));
//! assert_eq!(ev.timeout_ms, Some(5_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `node`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `node`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Node lifecycle ===
    /// Node driver entered `Running` and is about to initialize.
    ///
    /// Sets:
    /// - `node`: node uid
    /// - `state`: node kind (`thread` or `process`)
    NodeStarting,

    /// Node reached `Stopped`.
    ///
    /// Sets:
    /// - `node`: node uid
    NodeStopped,

    /// Node reached `Failed`.
    ///
    /// Sets:
    /// - `node`: node uid
    /// - `reason`: recorded termination cause
    NodeFailed,

    /// First stop request delivered to a node (flag armed).
    ///
    /// Sets:
    /// - `node`: node uid
    /// - `reason`: condition cause
    StopRequested,

    // === Termination control ===
    /// A watcher observed a child that exited without being asked to.
    ///
    /// Sets:
    /// - `node`: parent uid
    /// - `reason`: child uid
    /// - `state`: child final state
    UnsolicitedExit,

    /// A node outlived its grace period.
    ///
    /// Sets:
    /// - `node`: node uid
    /// - `timeout_ms`: grace that elapsed
    GraceExceeded,

    /// A forced interrupt (task abort or `SIGKILL`) was delivered.
    ///
    /// Sets:
    /// - `node`: node uid
    ForcedInterrupt,

    /// A node survived the forced interrupt and the hard timeout.
    ///
    /// Sets:
    /// - `node`: node uid
    /// - `timeout_ms`: hard timeout that elapsed
    ChildLeaked,

    /// The signal gateway armed the process-wide termination flag.
    ///
    /// Sets:
    /// - `reason`: `"signal"` or `"programmatic"`
    TerminationArmed,

    // === Remote jobs ===
    /// A remote job was submitted and is now tracked.
    ///
    /// Sets:
    /// - `job`: remote job id
    /// - `node`: pilot uid
    JobSubmitted,

    /// A tracked job reached a terminal state and it was published.
    ///
    /// Sets:
    /// - `job`: remote job id
    /// - `node`: pilot uid
    /// - `state`: published state
    JobStateChanged,

    /// A soft cancel was requested.
    ///
    /// Sets:
    /// - `job`: remote job id
    /// - `node`: pilot uid
    CancelRequested,

    /// The cancellation delay elapsed and the job was canceled on the remote side.
    ///
    /// Sets:
    /// - `job`: remote job id
    /// - `node`: pilot uid
    /// - `timeout_ms`: cancellation delay
    ForcedCancel,

    /// A tracked job was absent from too many consecutive state polls.
    ///
    /// Sets:
    /// - `job`: remote job id
    /// - `node`: pilot uid
    JobMissing,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,

    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Human-readable reason (errors, causes, overflow details).
    pub reason: Option<Arc<str>>,
    /// Node (or pilot, or subscriber) uid, if applicable.
    pub node: Option<Arc<str>>,
    /// Remote job id, if applicable.
    pub job: Option<Arc<str>>,
    /// State label attached to the event.
    pub state: Option<Arc<str>>,
    /// Event classification.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            at: SystemTime::now(),
            timeout_ms: None,
            reason: None,
            node: None,
            job: None,
            state: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a node uid.
    #[inline]
    pub fn with_node(mut self, node: impl Into<Arc<str>>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attaches a remote job id.
    #[inline]
    pub fn with_job(mut self, job: impl Into<Arc<str>>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Attaches a state label.
    #[inline]
    pub fn with_state(mut self, state: impl Into<Arc<str>>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_node(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_node(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
