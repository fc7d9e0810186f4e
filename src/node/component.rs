//! # Component abstraction and function-backed components.
//!
//! A [`Component`] is the behaviour a thread node runs. The driver calls its three
//! stages in order:
//!
//! ```text
//! initialize ─► work ─► work ─► ... ─► finalize
//!                 ▲          │
//!                 └──────────┘  until the termination flag is armed
//!                               or a termination condition is posted
//! ```
//!
//! `work` is invoked repeatedly; one invocation should do a bounded amount of work
//! (or wait with [`NodeContext::idle`]) and return, so the driver can observe the
//! termination flag between iterations.
//!
//! [`WorkFn`] wraps a closure as the work stage, and [`Idle`] is a container component
//! whose only job is to hold children.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;
use crate::node::NodeContext;

/// Shared handle to a component.
pub type ComponentRef = Arc<dyn Component>;

/// # Three-stage work loop body.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use pilotvisor::{Component, NodeContext, TaskError};
///
/// struct Poller;
///
/// #[async_trait]
/// impl Component for Poller {
///     async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
///         // poll something...
///         ctx.idle(std::time::Duration::from_millis(100)).await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Runs once before the first `work` iteration. Children are usually spawned here.
    async fn initialize(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        let _ = ctx;
        Ok(())
    }

    /// One iteration of the work loop.
    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError>;

    /// Runs once after children have been escalated.
    async fn finalize(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        let _ = ctx;
        Ok(())
    }
}

/// Function-backed component.
///
/// Wraps a closure that creates a new future per work iteration.
#[derive(Debug)]
pub struct WorkFn<F> {
    f: F,
}

impl<F> WorkFn<F> {
    /// Creates a new function-backed component.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the component and returns it as a shared handle.
    ///
    /// ## Example
    /// ```rust
    /// use pilotvisor::{ComponentRef, NodeContext, TaskError, WorkFn};
    ///
    /// let c: ComponentRef = WorkFn::arc(|ctx: NodeContext| async move {
    ///     ctx.idle(std::time::Duration::from_millis(10)).await;
    ///     Ok::<_, TaskError>(())
    /// });
    /// # let _ = c;
    /// ```
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Component for WorkFn<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        (self.f)(ctx.clone()).await
    }
}

/// Init hook of an [`Idle`] container.
type InitHook = Box<dyn Fn(&NodeContext) -> Result<(), TaskError> + Send + Sync>;

/// Container component: idles until terminated.
///
/// Useful as a root or intermediate node that only exists to own children
/// spawned through an init hook.
#[derive(Default)]
pub struct Idle {
    init: Option<InitHook>,
}

impl Idle {
    /// Container with no children of its own.
    pub fn new() -> Self {
        Self { init: None }
    }

    /// Container whose `initialize` runs `init`, typically to spawn children.
    pub fn with_init<I>(init: I) -> Self
    where
        I: Fn(&NodeContext) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            init: Some(Box::new(init)),
        }
    }
}

#[async_trait]
impl Component for Idle {
    async fn initialize(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        match &self.init {
            Some(init) => init(ctx),
            None => Ok(()),
        }
    }

    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        ctx.idle(ctx.config().watch_period()).await;
        Ok(())
    }
}
