//! # Children registry of one node.
//!
//! Each thread node owns exactly one [`Registry`]. It holds the handles of the
//! node's children and the node's watcher.
//!
//! ## Rules
//! - Only the owning node's driver and its `NodeContext` register children
//! - Snapshots are taken under the lock and then released; the lock is never held across `.await`
//! - `close()` and `drain()` close the registry: children registered afterwards are
//!   stopped on arrival, so nothing can slip in behind a finished escalation
//! - Children stay registered while they are escalated, so a forced driver can still
//!   reap them
//! - The watcher is spawned on the first registration (at most one per node)

use parking_lot::Mutex;

use crate::core::watcher::WatcherHandle;
use crate::node::Node;

struct Inner {
    children: Vec<Node>,
    watcher: Option<WatcherHandle>,
    closed: bool,
}

/// Children of one node.
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

/// What `register` did with a new child.
pub(crate) enum Admission {
    /// Registered; the caller must spawn a watcher.
    FirstChild,
    /// Registered; a watcher already exists.
    Registered,
    /// The registry is drained; the child was not registered.
    Closed,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                children: Vec::new(),
                watcher: None,
                closed: false,
            }),
        }
    }

    pub(crate) fn register(&self, child: Node) -> Admission {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Admission::Closed;
        }
        inner.children.push(child);
        if inner.watcher.is_none() && inner.children.len() == 1 {
            Admission::FirstChild
        } else {
            Admission::Registered
        }
    }

    pub(crate) fn set_watcher(&self, handle: WatcherHandle) {
        let mut inner = self.inner.lock();
        if inner.watcher.is_none() {
            inner.watcher = Some(handle);
        } else {
            handle.cancel();
        }
    }

    pub(crate) fn take_watcher(&self) -> Option<WatcherHandle> {
        self.inner.lock().watcher.take()
    }

    /// Copy of the current children; the lock is released on return.
    pub(crate) fn snapshot(&self) -> Vec<Node> {
        self.inner.lock().children.clone()
    }

    /// Closes the registry and returns the children, keeping them registered.
    pub(crate) fn close(&self) -> Vec<Node> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.children.clone()
    }

    /// Closes the registry and hands out all children.
    pub(crate) fn drain(&self) -> Vec<Node> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        std::mem::take(&mut inner.children)
    }
}
