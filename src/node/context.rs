//! # Node context.
//!
//! A [`NodeContext`] is handed to every [`Component`](crate::Component) stage. It carries
//! the running node's own [`Owner`] identity, so children spawned through it are owned
//! (and later escalated) by this node and nobody else.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::WaitForCancellationFuture;

use crate::config::Config;
use crate::core::registry::Admission;
use crate::core::watcher;
use crate::error::{NodeError, TaskError};
use crate::events::Bus;
use crate::faults::FaultInjector;
use crate::node::handle::Payload;
use crate::node::{ComponentRef, Node, NodeId, Owner, ProcessSpec, TerminationCondition};

/// Execution context of one thread node.
#[derive(Clone)]
pub struct NodeContext {
    node: Node,
    owner: Arc<Owner>,
}

impl NodeContext {
    pub(crate) fn new(node: Node) -> Self {
        let owner = Arc::new(Owner::new(Arc::<str>::from(node.uid())));
        Self { node, owner }
    }

    pub fn uid(&self) -> &NodeId {
        self.node.uid()
    }

    /// Observation handle of the running node.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Owner identity of this node's children.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn config(&self) -> &Config {
        &self.node.shared().cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.node.shared().bus
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.node.shared().faults
    }

    /// True once the flag is armed or a termination condition is pending.
    pub fn is_terminating(&self) -> bool {
        self.node.is_armed() || self.node.has_posted()
    }

    /// Resolves when the termination flag is armed.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.node.flag().cancelled()
    }

    /// Resolves when the flag is armed or a condition is posted to this node.
    pub async fn interrupted(&self) {
        loop {
            if self.is_terminating() {
                return;
            }
            tokio::select! {
                _ = self.node.flag().cancelled() => return,
                _ = self.node.wake().notified() => {}
            }
        }
    }

    /// Sleeps for `period`, waking early when [`interrupted`](Self::interrupted).
    pub async fn idle(&self, period: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.interrupted() => {}
        }
    }

    /// Raises the fault point `<uid>.<stage>`.
    pub fn fault_point(&self, stage: &str) -> Result<(), TaskError> {
        self.faults().raise_on(&format!("{}.{stage}", self.uid()))
    }

    /// Snapshot of the current children.
    pub fn children(&self) -> Vec<Node> {
        self.node.children().snapshot()
    }

    /// Creates, registers, and starts a thread child.
    pub fn spawn_thread(
        &self,
        uid: impl Into<NodeId>,
        component: ComponentRef,
    ) -> Result<Node, NodeError> {
        self.spawn_child(uid.into(), Payload::Thread(component))
    }

    /// Creates, registers, and starts a process child.
    pub fn spawn_process(&self, uid: impl Into<NodeId>, spec: ProcessSpec) -> Result<Node, NodeError> {
        self.spawn_child(uid.into(), Payload::Process(spec))
    }

    fn spawn_child(&self, uid: NodeId, payload: Payload) -> Result<Node, NodeError> {
        let child = Node::new(
            Arc::clone(self.node.shared()),
            &self.owner,
            Some(self.uid().clone()),
            uid,
            payload,
        );
        match self.node.children().register(child.clone()) {
            Admission::Closed => {
                let cause = TerminationCondition::external(self.uid().clone(), "parent terminating");
                child.request_stop(cause, Duration::ZERO);
                return Ok(child);
            }
            Admission::FirstChild => {
                self.node.children().set_watcher(watcher::spawn(self.node.clone()));
            }
            Admission::Registered => {}
        }
        child.start(&self.owner)?;
        Ok(child)
    }
}
