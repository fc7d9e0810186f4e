//! # Nodes: the supervised units of a tree.
//!
//! A node is a thread (runtime task running a [`Component`]) or a process (child
//! OS process described by a [`ProcessSpec`]). Nodes form a tree: each node owns
//! its children, watches them, and escalates them when it terminates.
//!
//! ```text
//!             root (thread)
//!            /            \
//!     tracker (thread)   agent (process) ── in the child process ──► agent root
//!                                                                   /          \
//!                                                             worker.1      worker.2
//! ```
//!
//! - [`Node`] handle: `start` / `stop` / `is_alive` for the [`Owner`], observation for everyone
//! - [`NodeState`] / [`NodeKind`]: lifecycle state machine
//! - [`TerminationCondition`]: why a node terminated
//! - [`Component`] / [`WorkFn`] / [`Idle`]: what a thread node runs
//! - [`NodeContext`]: what a component sees (owner, config, spawn children, idle)

mod component;
mod condition;
mod context;
mod handle;
mod id;
mod spec;
mod state;

pub use component::{Component, ComponentRef, Idle, WorkFn};
pub use condition::{Origin, TerminationCondition};
pub use context::NodeContext;
pub(crate) use handle::Payload;
pub use handle::{Node, StopReport};
pub use id::{NodeId, Owner};
pub use spec::ProcessSpec;
pub use state::{NodeKind, NodeState};
