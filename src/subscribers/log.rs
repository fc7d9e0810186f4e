//! # Structured logging subscriber.
//!
//! [`LogWriter`] turns runtime events into `tracing` records under the
//! `pilotvisor::events` target. Install a `tracing-subscriber` formatter in the
//! binary to see them (`RUST_LOG=pilotvisor=info`).
//!
//! ## Levels
//! - `info`: node started/stopped, job submitted/published
//! - `warn`: node failed, unsolicited exit, grace exceeded, forced interrupt, forced cancel
//! - `error`: leaked node, subscriber panic
//! - `debug`: everything else

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event-to-tracing bridge.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let node = e.node.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let job = e.job.as_deref().unwrap_or("-");
        let state = e.state.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::NodeStarting => {
                info!(target: "pilotvisor::events", seq = e.seq, node, kind = state, "node starting")
            }
            EventKind::NodeStopped => {
                info!(target: "pilotvisor::events", seq = e.seq, node, "node stopped")
            }
            EventKind::NodeFailed => {
                warn!(target: "pilotvisor::events", seq = e.seq, node, cause = reason, "node failed")
            }
            EventKind::StopRequested => {
                debug!(target: "pilotvisor::events", seq = e.seq, node, cause = reason, "stop requested")
            }
            EventKind::UnsolicitedExit => {
                warn!(target: "pilotvisor::events", seq = e.seq, node, child = reason, child_state = state, "unsolicited child exit")
            }
            EventKind::GraceExceeded => {
                warn!(target: "pilotvisor::events", seq = e.seq, node, grace_ms = ?e.timeout_ms, "grace exceeded")
            }
            EventKind::ForcedInterrupt => {
                warn!(target: "pilotvisor::events", seq = e.seq, node, "forced interrupt")
            }
            EventKind::ChildLeaked => {
                error!(target: "pilotvisor::events", seq = e.seq, node, hard_ms = ?e.timeout_ms, "node leaked")
            }
            EventKind::TerminationArmed => {
                info!(target: "pilotvisor::events", seq = e.seq, source = reason, "termination armed")
            }
            EventKind::JobSubmitted => {
                info!(target: "pilotvisor::events", seq = e.seq, job, pilot = node, "job submitted")
            }
            EventKind::JobStateChanged => {
                info!(target: "pilotvisor::events", seq = e.seq, job, pilot = node, state, "job state published")
            }
            EventKind::CancelRequested => {
                debug!(target: "pilotvisor::events", seq = e.seq, job, pilot = node, "cancel requested")
            }
            EventKind::ForcedCancel => {
                warn!(target: "pilotvisor::events", seq = e.seq, job, pilot = node, delay_ms = ?e.timeout_ms, "forced cancel")
            }
            EventKind::JobMissing => {
                warn!(target: "pilotvisor::events", seq = e.seq, job, pilot = node, "job disappeared")
            }
            EventKind::SubscriberOverflow => {
                debug!(target: "pilotvisor::events", seq = e.seq, subscriber = node, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                error!(target: "pilotvisor::events", seq = e.seq, subscriber = node, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
