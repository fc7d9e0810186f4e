//! # Node identities and exclusive ownership.
//!
//! A [`NodeId`] names a node in logs, events, and termination causes.
//! An [`Owner`] is the identity allowed to start, stop, and query a node: the
//! entity that created it. Owners are unique per construction and not `Clone`,
//! so holding a cloned [`Node`](crate::Node) handle grants observation, never control.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for owner identities.
static OWNER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Unique, human-readable node identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Returns the uid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&NodeId> for Arc<str> {
    fn from(id: &NodeId) -> Self {
        Arc::clone(&id.0)
    }
}

/// Opaque comparison key of an [`Owner`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct OwnerId(u64);

/// Exclusive controller identity.
///
/// Every node records the owner that created it; `start`, `stop`, and `is_alive`
/// fail with [`NodeError::OwnershipViolation`](crate::NodeError::OwnershipViolation)
/// for any other owner, even one with the same name.
#[derive(Debug)]
pub struct Owner {
    id: OwnerId,
    name: Arc<str>,
}

impl Owner {
    /// Creates a fresh owner identity.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: OwnerId(OWNER_SEQ.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
        }
    }

    /// Returns the owner name used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> OwnerId {
        self.id
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}
