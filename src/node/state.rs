//! # Node kinds and lifecycle states.
//!
//! ```text
//! Created ──► Running ──► Stopping ──► Stopped
//!    │           │                 └──► Failed
//!    │           ├──────────────────► Stopped / Failed   (work loop ended on its own)
//!    └──────────────────────────────► Stopped             (stopped before start)
//! ```
//!
//! `Stopped` and `Failed` are terminal. No transition re-enters `Running`.

use std::fmt;

/// What executes a node's work loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A runtime task inside this process.
    Thread,
    /// A child OS process.
    Process,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Thread => "thread",
            NodeKind::Process => "process",
        })
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Constructed, not yet started.
    Created,
    /// Work loop active.
    Running,
    /// Termination flag armed, escalation in progress.
    Stopping,
    /// Clean exit.
    Stopped,
    /// Stage error, unsolicited failure, or forced termination.
    Failed,
}

impl NodeState {
    /// True for `Stopped` and `Failed`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Stopped | NodeState::Failed)
    }

    /// True for `Running` and `Stopping`.
    #[inline]
    pub fn is_alive(self) -> bool {
        matches!(self, NodeState::Running | NodeState::Stopping)
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_move_to(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Created, Stopped)
                | (Created, Failed)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }

    /// Short lowercase label for logs and events.
    pub fn as_label(self) -> &'static str {
        match self {
            NodeState::Created => "created",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
            NodeState::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
