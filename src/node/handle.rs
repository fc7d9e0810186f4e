//! # Node handle.
//!
//! [`Node`] is a cheap, cloneable handle to one supervised unit. Clones observe
//! (`uid`, `state`, `termination`, `terminated`); only the node's [`Owner`] may
//! control it (`start`, `stop`, `is_alive`).
//!
//! ## Termination protocol
//! ```text
//! stop(owner, grace)            first call                       repeated/concurrent call
//!   │                              │                                     │
//!   ├─ owner check                 ├─ arm flag (record External)         ├─ force now
//!   └─ already terminal? ─► report ├─ join ≤ grace                       └─ join ≤ hard
//!                                  ├─ force (abort / SIGKILL)
//!                                  └─ join ≤ hard, else leaked (settled Failed)
//! ```
//!
//! Arming records the node's stop deadline (`now + grace`). When the node escalates
//! its own children, they get what is left of that window minus a reserve for
//! forcing them: twice the hard timeout, at most half the remainder. A child that
//! finishes within its parent's grace is therefore never forced.
//!
//! ## Rules
//! - The termination flag is monotonic: once armed it is never cleared
//! - The first recorded [`TerminationCondition`] wins
//! - Terminal state is published only after the node's driver and subtree have finished,
//!   except for a leaked node, which is settled `Failed` when its hard deadline passes
//! - Waits on node state always carry a deadline inside the runtime

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::escalation::EscalationPolicy;
use crate::core::registry::Registry;
use crate::core::shared::Shared;
use crate::core::{driver, process};
use crate::error::NodeError;
use crate::events::{Event, EventKind};
use crate::node::id::OwnerId;
use crate::node::{ComponentRef, NodeId, NodeKind, NodeState, Owner, ProcessSpec, TerminationCondition};

/// What a node runs, consumed by `start`.
pub(crate) enum Payload {
    Thread(ComponentRef),
    Process(ProcessSpec),
}

pub(crate) struct NodeInner {
    uid: NodeId,
    kind: NodeKind,
    owner: OwnerId,
    owner_name: Arc<str>,
    parent: Option<NodeId>,
    flag: CancellationToken,
    state: watch::Sender<NodeState>,
    stop_requested: AtomicBool,
    stop_deadline: Mutex<Option<Instant>>,
    condition: Mutex<Option<TerminationCondition>>,
    mailbox: Mutex<VecDeque<TerminationCondition>>,
    wake: Notify,
    leaked: Mutex<Vec<NodeId>>,
    abort: Mutex<Option<AbortHandle>>,
    pid: AtomicU32,
    payload: Mutex<Option<Payload>>,
    children: Registry,
    shared: Arc<Shared>,
}

/// Outcome of [`Node::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// State after the call returned.
    pub state: NodeState,
    /// Whether the forced path was taken for this node.
    pub forced: bool,
    /// Nodes (this one or descendants) that survived forcing.
    pub leaked: Vec<NodeId>,
}

impl StopReport {
    /// Stopped without forcing and without leaks.
    pub fn is_clean(&self) -> bool {
        self.state == NodeState::Stopped && !self.forced && self.leaked.is_empty()
    }
}

/// Handle to a supervised thread or process.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("uid", &self.inner.uid)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        shared: Arc<Shared>,
        owner: &Owner,
        parent: Option<NodeId>,
        uid: NodeId,
        payload: Payload,
    ) -> Self {
        let kind = match payload {
            Payload::Thread(_) => NodeKind::Thread,
            Payload::Process(_) => NodeKind::Process,
        };
        let (state, _) = watch::channel(NodeState::Created);
        Self {
            inner: Arc::new(NodeInner {
                uid,
                kind,
                owner: owner.id(),
                owner_name: owner.name_arc(),
                parent,
                flag: CancellationToken::new(),
                state,
                stop_requested: AtomicBool::new(false),
                stop_deadline: Mutex::new(None),
                condition: Mutex::new(None),
                mailbox: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                leaked: Mutex::new(Vec::new()),
                abort: Mutex::new(None),
                pid: AtomicU32::new(0),
                payload: Mutex::new(Some(payload)),
                children: Registry::new(),
                shared,
            }),
        }
    }

    pub fn uid(&self) -> &NodeId {
        &self.inner.uid
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    /// Uid of the parent node, if any.
    pub fn parent(&self) -> Option<&NodeId> {
        self.inner.parent.as_ref()
    }

    /// Current lifecycle state; readable by anyone.
    pub fn state(&self) -> NodeState {
        *self.inner.state.borrow()
    }

    /// Recorded termination condition, if the node has started terminating.
    pub fn termination(&self) -> Option<TerminationCondition> {
        self.inner.condition.lock().clone()
    }

    /// Nodes leaked by this node's own escalations.
    pub fn leaked(&self) -> Vec<NodeId> {
        self.inner.leaked.lock().clone()
    }

    /// OS pid while a process node's child is running.
    pub fn pid(&self) -> Option<u32> {
        match self.inner.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Resolves once the node is terminal.
    pub async fn terminated(&self) -> NodeState {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.state()
    }

    /// Starts the node's driver. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// - [`NodeError::OwnershipViolation`] for a foreign owner
    /// - [`NodeError::AlreadyStarted`] if the node left `Created`
    /// - [`NodeError::Spawn`] if a process node's program cannot be spawned
    ///   (the node ends `Failed`)
    pub fn start(&self, owner: &Owner) -> Result<(), NodeError> {
        self.check_owner(owner)?;
        let already = || NodeError::AlreadyStarted {
            uid: self.inner.uid.clone(),
        };
        let payload = self.inner.payload.lock().take().ok_or_else(already)?;
        if !self.advance_from(NodeState::Created, NodeState::Running) {
            return Err(already());
        }
        match payload {
            Payload::Thread(component) => {
                driver::spawn(self.clone(), component);
                Ok(())
            }
            Payload::Process(spec) => process::spawn(self, &spec),
        }
    }

    /// True while `Running` or `Stopping`. Only the owner may ask.
    pub fn is_alive(&self, owner: &Owner) -> Result<bool, NodeError> {
        self.check_owner(owner)?;
        Ok(self.state().is_alive())
    }

    /// Terminates the node and its subtree within `grace` plus the configured hard timeout.
    ///
    /// Idempotent: a terminal node reports immediately; a repeated or concurrent call
    /// skips the graceful path. Leaks are reported, never raised.
    pub async fn stop(&self, owner: &Owner, grace: Duration) -> Result<StopReport, NodeError> {
        self.check_owner(owner)?;

        let state = self.state();
        if state.is_terminal() {
            self.inner.stop_requested.store(true, Ordering::Release);
            return Ok(StopReport {
                state,
                forced: false,
                leaked: self.leaked(),
            });
        }

        let hard = self.inner.shared.cfg.hard;
        let repeated = self.inner.stop_requested.swap(true, Ordering::AcqRel);
        let policy = if repeated {
            EscalationPolicy::new(Duration::ZERO, hard)
        } else {
            EscalationPolicy::new(grace, hard)
        };
        let cause = TerminationCondition::external(
            self.inner.uid.clone(),
            format!("stop requested by {}", owner.name()),
        );
        let report = policy
            .terminate(&self.inner.shared.bus, std::slice::from_ref(self), &cause)
            .await;

        Ok(StopReport {
            state: self.state(),
            forced: report.forced.contains(&self.inner.uid),
            leaked: report.leaked,
        })
    }

    fn check_owner(&self, owner: &Owner) -> Result<(), NodeError> {
        if owner.id() == self.inner.owner {
            return Ok(());
        }
        Err(NodeError::OwnershipViolation {
            uid: self.inner.uid.clone(),
            owner: self.inner.owner_name.to_string(),
            caller: owner.name().to_string(),
        })
    }

    // ---- control surface used by drivers, watchers, and escalation ----

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    pub(crate) fn children(&self) -> &Registry {
        &self.inner.children
    }

    pub(crate) fn flag(&self) -> &CancellationToken {
        &self.inner.flag
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.inner.flag.is_cancelled()
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::Acquire)
    }

    /// Arms the flag on behalf of the owner or a terminating parent, granting `grace`.
    pub(crate) fn request_stop(&self, cond: TerminationCondition, grace: Duration) {
        self.inner.stop_requested.store(true, Ordering::Release);
        if self.is_armed() {
            return;
        }
        *self.inner.stop_deadline.lock() = Some(Instant::now() + grace);
        self.shared().bus.publish(
            Event::new(EventKind::StopRequested)
                .with_node(self.uid())
                .with_reason(Arc::clone(&cond.cause)),
        );
        self.record_condition(cond);
        if self.advance_from(NodeState::Created, NodeState::Stopped) {
            self.shared()
                .bus
                .publish(Event::new(EventKind::NodeStopped).with_node(self.uid()));
        } else {
            self.advance_from(NodeState::Running, NodeState::Stopping);
        }
        self.inner.flag.cancel();
        self.inner.wake.notify_one();
    }

    /// Grace for escalating this node's children.
    ///
    /// A node armed through [`request_stop`](Self::request_stop) hands its children
    /// the rest of its own window, keeping a reserve for forcing them. A node that
    /// exits on its own uses the configured grace.
    pub(crate) fn child_grace(&self) -> Duration {
        let cfg = &self.inner.shared.cfg;
        let Some(deadline) = *self.inner.stop_deadline.lock() else {
            return cfg.grace;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let reserve = cfg.hard.saturating_mul(2).min(remaining / 2);
        remaining - reserve
    }

    /// Delivers the forced interrupt: abort for threads, `SIGKILL` for processes.
    pub(crate) fn force(&self) {
        if self.state().is_terminal() {
            return;
        }
        if let Some(pid) = self.pid() {
            process::kill(pid);
        }
        if let Some(handle) = self.inner.abort.lock().as_ref() {
            handle.abort();
        }
    }

    /// Waits for a terminal state until `deadline`; true if reached.
    pub(crate) async fn join_until(&self, deadline: Instant) -> bool {
        let mut rx = self.inner.state.subscribe();
        let joined = tokio::time::timeout_at(deadline, rx.wait_for(|s| s.is_terminal())).await;
        matches!(joined, Ok(Ok(_)))
    }

    /// Posts a condition to the control mailbox and wakes the work loop.
    pub(crate) fn post(&self, cond: TerminationCondition) {
        self.inner.mailbox.lock().push_back(cond);
        self.inner.wake.notify_one();
    }

    pub(crate) fn take_posted(&self) -> Option<TerminationCondition> {
        self.inner.mailbox.lock().pop_front()
    }

    pub(crate) fn has_posted(&self) -> bool {
        !self.inner.mailbox.lock().is_empty()
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.inner.wake
    }

    pub(crate) fn record_condition(&self, cond: TerminationCondition) {
        let mut slot = self.inner.condition.lock();
        if slot.is_none() {
            *slot = Some(cond);
        }
    }

    pub(crate) fn enter_stopping(&self) {
        self.advance_from(NodeState::Running, NodeState::Stopping);
    }

    /// Moves to a terminal state if the state machine allows it.
    pub(crate) fn settle(&self, to: NodeState) -> bool {
        self.inner.state.send_if_modified(|s| {
            if s.can_move_to(to) {
                *s = to;
                true
            } else {
                false
            }
        })
    }

    fn advance_from(&self, from: NodeState, to: NodeState) -> bool {
        self.inner.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn relay_leaked(&self, ids: Vec<NodeId>) {
        let mut leaked = self.inner.leaked.lock();
        for id in ids {
            if !leaked.contains(&id) {
                leaked.push(id);
            }
        }
    }

    pub(crate) fn set_abort(&self, handle: AbortHandle) {
        *self.inner.abort.lock() = Some(handle);
    }

    pub(crate) fn set_pid(&self, pid: Option<u32>) {
        self.inner.pid.store(pid.unwrap_or(0), Ordering::Release);
    }
}
