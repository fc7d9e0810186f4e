//! # Node driver: the main loop of a thread node.
//!
//! ```text
//! spawn(node, component)
//!   ├─► drive()  [runtime task, abortable]
//!   │     ├─ initialize  + fault <uid>.init
//!   │     ├─ loop:
//!   │     │    flag armed?        → exit (requested)
//!   │     │    condition posted?  → exit (failed, cause recorded)
//!   │     │    work + fault <uid>.work
//!   │     ├─ Stopping; self-arm flag
//!   │     ├─ stop watcher, escalate children (child_grace, hard)
//!   │     └─ finalize + fault <uid>.finalize
//!   └─► monitor()  [runtime task, never aborted]
//!         ├─ Ok(state)          → settle(state)
//!         └─ aborted / panicked → record cause, reap children (forced), settle(Failed)
//! ```
//!
//! ## Rules
//! - A stage error never propagates to a caller: it becomes `Failed` plus an
//!   `Internal` condition for the parent's watcher
//! - Children are always escalated before `finalize`
//! - A node whose children leaked ends `Failed`
//! - The terminal state is published by the monitor, after the task and the subtree are gone

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::escalation::EscalationPolicy;
use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::node::{Component, ComponentRef, Node, NodeContext, NodeState, TerminationCondition};
use crate::subscribers::panic_message;

/// Spawns the driver and its monitor for a thread node.
pub(crate) fn spawn(node: Node, component: ComponentRef) {
    let work = tokio::spawn(drive(node.clone(), component));
    node.set_abort(work.abort_handle());
    tokio::spawn(monitor(node, work));
}

/// Awaits a driver task and publishes the node's terminal state.
pub(crate) async fn monitor(node: Node, work: JoinHandle<NodeState>) {
    let state = match work.await {
        Ok(state) => state,
        Err(err) => {
            let cause = if err.is_panic() {
                format!("panic: {}", panic_message(&*err.into_panic()))
            } else {
                "forced".to_string()
            };
            warn!(node = %node.uid(), cause = %cause, "node driver did not finish");
            node.record_condition(TerminationCondition::internal(node.uid().clone(), cause));
            reap(&node).await;
            NodeState::Failed
        }
    };

    if !node.settle(state) {
        return;
    }
    let bus = &node.shared().bus;
    match state {
        NodeState::Failed => {
            let cause = node
                .termination()
                .map(|c| c.cause.to_string())
                .unwrap_or_default();
            warn!(node = %node.uid(), cause = %cause, "node failed");
            bus.publish(
                Event::new(EventKind::NodeFailed)
                    .with_node(node.uid())
                    .with_reason(cause),
            );
        }
        _ => {
            info!(node = %node.uid(), "node stopped");
            bus.publish(Event::new(EventKind::NodeStopped).with_node(node.uid()));
        }
    }
}

/// Forced cleanup for a driver that was aborted or panicked.
async fn reap(node: &Node) {
    if let Some(watcher) = node.children().take_watcher() {
        watcher.cancel();
    }
    let children = node.children().drain();
    if children.is_empty() {
        return;
    }
    let policy = EscalationPolicy::new(Duration::ZERO, node.shared().cfg.hard);
    let cause = TerminationCondition::external(node.uid().clone(), "parent forced");
    let report = policy.terminate(&node.shared().bus, &children, &cause).await;
    node.relay_leaked(report.leaked);
}

async fn drive(node: Node, component: ComponentRef) -> NodeState {
    let ctx = NodeContext::new(node.clone());
    info!(node = %node.uid(), "node starting");
    node.shared().bus.publish(
        Event::new(EventKind::NodeStarting)
            .with_node(node.uid())
            .with_state(node.kind().to_string()),
    );

    let exit = match stage(&ctx, "init", component.initialize(&ctx)).await {
        Ok(()) => work_loop(&node, &ctx, component.as_ref()).await,
        Err(cond) => Some(cond),
    };
    if let Some(cond) = &exit {
        node.record_condition(cond.clone());
    }

    node.enter_stopping();
    node.flag().cancel();
    let leaked = shutdown_children(&node).await;
    if leaked {
        node.record_condition(TerminationCondition::internal(node.uid().clone(), "children leaked"));
    }

    let finalized = stage(&ctx, "finalize", component.finalize(&ctx)).await;
    if let Err(cond) = &finalized {
        node.record_condition(cond.clone());
    }

    if exit.is_some() || finalized.is_err() || leaked {
        NodeState::Failed
    } else {
        NodeState::Stopped
    }
}

/// Runs `work` until the flag is armed (`None`) or the node must fail (`Some`).
async fn work_loop(
    node: &Node,
    ctx: &NodeContext,
    component: &dyn Component,
) -> Option<TerminationCondition> {
    loop {
        if node.is_armed() {
            return None;
        }
        if let Some(cond) = node.take_posted() {
            warn!(node = %node.uid(), cause = %cond.cause, source = %cond.source, "terminating on posted condition");
            return Some(cond);
        }
        if let Err(cond) = stage(ctx, "work", component.work(ctx)).await {
            return Some(cond);
        }
    }
}

/// Awaits one stage then its fault point; maps failures to an `Internal` condition.
async fn stage<F>(ctx: &NodeContext, name: &str, fut: F) -> Result<(), TerminationCondition>
where
    F: Future<Output = Result<(), TaskError>>,
{
    match fut.await.and_then(|()| ctx.fault_point(name)) {
        Ok(()) | Err(TaskError::Canceled) => Ok(()),
        Err(e) => {
            warn!(node = %ctx.uid(), stage = name, label = e.as_label(), error = %e, "stage failed");
            Err(TerminationCondition::internal(ctx.uid().clone(), e.as_message()))
        }
    }
}

/// Stops the watcher, then escalates every child within the node's remaining window.
/// Returns true if any descendant leaked.
async fn shutdown_children(node: &Node) -> bool {
    if let Some(watcher) = node.children().take_watcher() {
        watcher.stop().await;
    }
    let children = node.children().close();
    if children.is_empty() {
        return false;
    }
    let policy = EscalationPolicy::new(node.child_grace(), node.shared().cfg.hard);
    info!(node = %node.uid(), children = children.len(), grace = ?policy.grace, "escalating children");
    let cause = TerminationCondition::external(node.uid().clone(), "parent terminating");
    let report = policy.terminate(&node.shared().bus, &children, &cause).await;
    let leaked = !report.is_bounded();
    node.relay_leaked(report.leaked);
    node.children().drain();
    leaked
}
