//! # Escalation: bounded termination of a set of nodes.
//!
//! ```text
//! terminate(nodes)
//!   1. arm every flag                 (request_stop, granting grace)
//!   2. join all, concurrently         ≤ grace
//!   3. force survivors                (abort / SIGKILL)
//!   4. join survivors                 ≤ hard
//!   5. survivors are leaked           (settled Failed, ChildLeaked; never retried, never raised)
//! ```
//!
//! Siblings share one [`EscalationTimer`], so a set of nodes costs `grace + hard`
//! regardless of its size. A node's own escalation of its children runs inside
//! the node's grace window, which keeps the cost of a tree independent of depth
//! whenever forced interrupts take effect.
//!
//! Leaks found by a child's escalation are relayed into the parent's report.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::warn;

use crate::config::Config;
use crate::error::EscalationError;
use crate::events::{Bus, Event, EventKind};
use crate::node::{Node, NodeId, NodeState, TerminationCondition};

/// Grace and hard timeouts of one escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Time granted to armed nodes before forcing.
    pub grace: Duration,
    /// Time granted after the forced interrupt.
    pub hard: Duration,
}

/// Deadlines of one escalation attempt.
#[derive(Debug, Clone, Copy)]
pub struct EscalationTimer {
    pub grace_deadline: Instant,
    pub hard_deadline: Instant,
}

/// Per-node outcome of an escalation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationReport {
    /// Ended `Stopped`.
    pub stopped: Vec<NodeId>,
    /// Ended `Failed`.
    pub failed: Vec<NodeId>,
    /// Needed the forced interrupt.
    pub forced: Vec<NodeId>,
    /// Survived everything, plus leaks relayed from descendants.
    pub leaked: Vec<NodeId>,
}

impl EscalationReport {
    /// True when nothing leaked.
    pub fn is_bounded(&self) -> bool {
        self.leaked.is_empty()
    }
}

struct Outcome {
    forced: bool,
    leaked: bool,
}

impl EscalationPolicy {
    pub fn new(grace: Duration, hard: Duration) -> Self {
        Self { grace, hard }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.grace, cfg.hard)
    }

    /// Deadlines for an attempt starting now.
    pub fn timer(&self) -> EscalationTimer {
        let grace_deadline = Instant::now() + self.grace;
        EscalationTimer {
            grace_deadline,
            hard_deadline: grace_deadline + self.hard,
        }
    }

    /// Terminates `nodes` within `grace + hard`.
    pub(crate) async fn terminate(
        &self,
        bus: &Bus,
        nodes: &[Node],
        cause: &TerminationCondition,
    ) -> EscalationReport {
        let timer = self.timer();
        for node in nodes {
            node.request_stop(cause.clone(), self.grace);
        }

        let outcomes = join_all(nodes.iter().map(|n| self.settle_one(bus, n, timer))).await;

        let mut report = EscalationReport::default();
        for (node, outcome) in nodes.iter().zip(outcomes) {
            let uid = node.uid().clone();
            if outcome.forced {
                report.forced.push(uid.clone());
            }
            if outcome.leaked {
                report.leaked.push(uid);
            } else {
                match node.state() {
                    NodeState::Failed => report.failed.push(uid),
                    _ => report.stopped.push(uid),
                }
            }
            report.leaked.extend(node.leaked());
        }
        report
    }

    async fn settle_one(&self, bus: &Bus, node: &Node, timer: EscalationTimer) -> Outcome {
        if node.join_until(timer.grace_deadline).await {
            return Outcome {
                forced: false,
                leaked: false,
            };
        }

        if !self.grace.is_zero() {
            warn!(node = %node.uid(), grace = ?self.grace, "grace exceeded; forcing");
            bus.publish(
                Event::new(EventKind::GraceExceeded)
                    .with_node(node.uid())
                    .with_timeout(self.grace),
            );
        }
        node.force();
        bus.publish(Event::new(EventKind::ForcedInterrupt).with_node(node.uid()));

        if node.join_until(timer.hard_deadline).await {
            return Outcome {
                forced: true,
                leaked: false,
            };
        }

        let err = EscalationError::TerminationTimeout {
            uid: node.uid().clone(),
            grace: self.grace,
            hard: self.hard,
        };
        warn!(node = %node.uid(), label = err.as_label(), "{err}");
        bus.publish(
            Event::new(EventKind::ChildLeaked)
                .with_node(node.uid())
                .with_timeout(self.hard),
        );
        // The driver may still be running; the monitor's late settle is a no-op.
        node.record_condition(TerminationCondition::internal(node.uid().clone(), err.to_string()));
        if node.settle(NodeState::Failed) {
            bus.publish(
                Event::new(EventKind::NodeFailed)
                    .with_node(node.uid())
                    .with_reason(err.as_label()),
            );
        }
        Outcome {
            forced: true,
            leaked: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_stacks_hard_after_grace() {
        let policy = EscalationPolicy::new(Duration::from_secs(3), Duration::from_secs(1));
        let start = Instant::now();
        let timer = policy.timer();
        assert_eq!(timer.grace_deadline - start, Duration::from_secs(3));
        assert_eq!(timer.hard_deadline - start, Duration::from_secs(4));
    }
}
