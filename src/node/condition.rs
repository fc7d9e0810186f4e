//! # Termination conditions.
//!
//! A [`TerminationCondition`] is created whenever a node decides to terminate:
//! - `External`: its owner called `stop()`;
//! - `Internal`: one of its own stages failed, its watcher failed, or a child exited unsolicited.
//!
//! The condition is recorded on the node (first one wins) and is what a parent's
//! watcher relays upward.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use super::NodeId;

/// Where a termination request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The owner called `stop()`.
    External,
    /// The node's own control path decided to terminate.
    Internal,
}

/// Why and when a node started terminating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationCondition {
    /// External or internal.
    pub origin: Origin,
    /// Cause text. For unsolicited child exits this is the child's uid.
    pub cause: Arc<str>,
    /// Node that produced the condition.
    pub source: NodeId,
    /// Wall-clock creation time.
    pub at: SystemTime,
}

impl TerminationCondition {
    /// Creates an `External` condition.
    pub fn external(source: NodeId, cause: impl Into<Arc<str>>) -> Self {
        Self::new(Origin::External, source, cause)
    }

    /// Creates an `Internal` condition.
    pub fn internal(source: NodeId, cause: impl Into<Arc<str>>) -> Self {
        Self::new(Origin::Internal, source, cause)
    }

    fn new(origin: Origin, source: NodeId, cause: impl Into<Arc<str>>) -> Self {
        Self {
            origin,
            cause: cause.into(),
            source,
            at: SystemTime::now(),
        }
    }

    /// True for `Internal` conditions.
    #[inline]
    pub fn is_internal(&self) -> bool {
        self.origin == Origin::Internal
    }
}

impl fmt::Display for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self.origin {
            Origin::External => "external",
            Origin::Internal => "internal",
        };
        write!(f, "{origin} termination of {}: {}", self.source, self.cause)
    }
}
