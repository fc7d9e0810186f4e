//! # Watcher: detects unsolicited child exits.
//!
//! One watcher runs per node that has children. It samples the children on
//! `Config::watch_interval` and turns exits nobody asked for into termination
//! conditions posted to its own node.
//!
//! ```text
//! tick ─► fault <uid>.watch ─► parent armed? ─yes─► skip
//!                                   │no
//!                                   ▼
//!                         snapshot(children)   (lock released)
//!                                   │
//!         terminal && !stop_requested && not yet reported
//!                                   │
//!         warn + UnsolicitedExit ─► post Internal(cause = child uid) to parent
//! ```
//!
//! ## Rules
//! - Looks only toward the leaves: never observes its own parent
//! - Each child is reported at most once
//! - Its own failure (fault or panic) posts an `Internal` condition with cause `watcher`

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::node::{Node, NodeId, TerminationCondition};
use crate::subscribers::panic_message;

/// Bound on waiting for a stopped watcher task.
const JOIN_BOUND: Duration = Duration::from_secs(1);

/// Running watcher of one node.
pub(crate) struct WatcherHandle {
    stop: CancellationToken,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    pub(crate) fn cancel(&self) {
        self.stop.cancel();
    }

    /// Cancels and joins the watcher (bounded, then aborted).
    pub(crate) async fn stop(self) {
        self.stop.cancel();
        let mut join = self.join;
        if tokio::time::timeout(JOIN_BOUND, &mut join).await.is_err() {
            join.abort();
        }
    }
}

/// Starts the watcher of `parent`.
pub(crate) fn spawn(parent: Node) -> WatcherHandle {
    let stop = CancellationToken::new();
    let join = tokio::spawn(run(parent, stop.clone()));
    WatcherHandle { stop, join }
}

async fn run(parent: Node, stop: CancellationToken) {
    let result = AssertUnwindSafe(watch(&parent, &stop)).catch_unwind().await;
    let detail = match result {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.as_message(),
        Err(panic) => format!("panic: {}", panic_message(&*panic)),
    };
    warn!(target: "pilotvisor::watcher", node = %parent.uid(), detail = %detail, "watcher failed");
    parent.post(TerminationCondition::internal(parent.uid().clone(), "watcher"));
}

async fn watch(parent: &Node, stop: &CancellationToken) -> Result<(), TaskError> {
    let shared = parent.shared();
    let tag = format!("{}.watch", parent.uid());
    let mut reported: HashSet<NodeId> = HashSet::new();

    let mut tick = tokio::time::interval(shared.cfg.watch_period());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            _ = tick.tick() => {}
        }
        shared.faults.raise_on(&tag)?;
        if parent.is_armed() {
            continue;
        }

        for child in parent.children().snapshot() {
            if reported.contains(child.uid()) {
                continue;
            }
            let state = child.state();
            if !state.is_terminal() || child.stop_requested() {
                continue;
            }
            reported.insert(child.uid().clone());

            let child_cause = child
                .termination()
                .map(|c| c.cause.to_string())
                .unwrap_or_default();
            warn!(
                target: "pilotvisor::watcher",
                node = %parent.uid(),
                child = %child.uid(),
                state = %state,
                child_cause = %child_cause,
                "unsolicited child exit"
            );
            shared.bus.publish(
                Event::new(EventKind::UnsolicitedExit)
                    .with_node(parent.uid())
                    .with_reason(child.uid())
                    .with_state(state.as_label()),
            );
            parent.post(TerminationCondition::internal(
                child.uid().clone(),
                child.uid().as_str(),
            ));
        }
    }
}
