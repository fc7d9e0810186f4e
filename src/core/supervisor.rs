//! # Supervisor: owns the root of a node tree and drives its shutdown.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`], the shared
//! configuration and fault rules, the optional [`SignalGateway`], and the
//! [`Owner`] identity of every root node it creates.
//!
//! ## High-level architecture
//! ```text
//! run(root):
//!   root.start(owner)
//!   select! {
//!     root.terminated()          → root ended on its own (failure propagated up)
//!     gateway.wait_armed(poll)   → first SIGINT/SIGTERM
//!     shutdown.cancelled()       → request_shutdown()
//!   }
//!   root.stop(owner, cfg.grace)  → EscalationPolicy over the whole tree
//!   RunOutcome { state, cause, leaked }
//!
//! Event flow:
//!   drivers / watchers / escalation / tracker ── publish ──► Bus
//!        ──► subscriber_listener ──► SubscriberSet::emit ──► [queue S1..SN] ──► on_event
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use pilotvisor::{Config, Idle, LogWriter, Supervisor, TaskError, WorkFn};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(Config::default())
//!         .with_subscribers(vec![Arc::new(LogWriter)])
//!         .with_signal_gateway()
//!         .build()?;
//!
//!     let root = sup.thread(
//!         "root",
//!         Arc::new(Idle::with_init(|ctx| {
//!             let ticker = WorkFn::arc(|ctx: pilotvisor::NodeContext| async move {
//!                 ctx.idle(Duration::from_millis(250)).await;
//!                 Ok::<_, TaskError>(())
//!             });
//!             ctx.spawn_thread("root.ticker", ticker).map_err(|e| TaskError::fail(e.to_string()))?;
//!             Ok(())
//!         })),
//!     );
//!
//!     let outcome = sup.run(&root).await?;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::builder::SupervisorBuilder;
use crate::core::gateway::SignalGateway;
use crate::core::shared::Shared;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::node::{ComponentRef, Node, NodeId, NodeState, Owner, Payload, ProcessSpec, TerminationCondition};
use crate::subscribers::SubscriberSet;

/// How often the control loop polls the signal gateway.
const GATEWAY_POLL: Duration = Duration::from_millis(100);

/// Result of [`Supervisor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Final state of the root node.
    pub state: NodeState,
    /// The root's recorded termination condition.
    pub cause: Option<TerminationCondition>,
    /// Nodes that survived forcing anywhere in the tree.
    pub leaked: Vec<NodeId>,
}

impl RunOutcome {
    /// Process exit code: non-zero when the root ended `Failed`.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            NodeState::Failed => 1,
            _ => 0,
        }
    }
}

/// Root owner and shutdown driver of a node tree.
pub struct Supervisor {
    shared: Arc<Shared>,
    owner: Owner,
    subs: Arc<SubscriberSet>,
    gateway: Option<SignalGateway>,
    shutdown: CancellationToken,
    closing: CancellationToken,
    listener: JoinHandle<()>,
}

impl Supervisor {
    /// Starts building a supervisor.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        shared: Arc<Shared>,
        owner: Owner,
        subs: Arc<SubscriberSet>,
        gateway: Option<SignalGateway>,
    ) -> Self {
        let closing = CancellationToken::new();
        let listener = tokio::spawn(subscriber_listener(
            shared.bus.subscribe(),
            Arc::clone(&subs),
            closing.clone(),
        ));
        Self {
            shared,
            owner,
            subs,
            gateway,
            shutdown: CancellationToken::new(),
            closing,
            listener,
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.shared.bus
    }

    /// Owner of every root node created by this supervisor.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The installed signal gateway, if any.
    pub fn gateway(&self) -> Option<&SignalGateway> {
        self.gateway.as_ref()
    }

    /// Creates an unstarted thread root.
    pub fn thread(&self, uid: impl Into<NodeId>, component: ComponentRef) -> Node {
        Node::new(
            Arc::clone(&self.shared),
            &self.owner,
            None,
            uid.into(),
            Payload::Thread(component),
        )
    }

    /// Creates an unstarted process root.
    pub fn process(&self, uid: impl Into<NodeId>, spec: ProcessSpec) -> Node {
        Node::new(
            Arc::clone(&self.shared),
            &self.owner,
            None,
            uid.into(),
            Payload::Process(spec),
        )
    }

    /// Makes a pending [`run`](Self::run) stop its root gracefully.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Starts `root`, waits for it to end or for a shutdown trigger, then stops it.
    pub async fn run(&self, root: &Node) -> Result<RunOutcome, RuntimeError> {
        root.start(&self.owner)?;

        let trigger = tokio::select! {
            _ = root.terminated() => None,
            _ = wait_gateway(self.gateway.as_ref()) => Some("signal"),
            _ = self.shutdown.cancelled() => Some("programmatic"),
        };
        match trigger {
            Some(source) => {
                info!(node = %root.uid(), source, "termination armed; stopping root");
                self.shared
                    .bus
                    .publish(Event::new(EventKind::TerminationArmed).with_reason(source));
            }
            None => info!(node = %root.uid(), state = %root.state(), "root ended on its own"),
        }

        let report = root.stop(&self.owner, self.shared.cfg.grace).await?;
        if report.leaked.is_empty() {
            info!(node = %root.uid(), state = %report.state, "root terminated");
        } else {
            warn!(node = %root.uid(), state = %report.state, leaked = ?report.leaked, "root terminated with leaks");
        }
        Ok(RunOutcome {
            state: report.state,
            cause: root.termination(),
            leaked: report.leaked,
        })
    }

    /// Flushes pending events to subscribers and shuts their workers down.
    pub async fn close(self) {
        self.closing.cancel();
        let _ = self.listener.await;
        if let Ok(set) = Arc::try_unwrap(self.subs) {
            set.shutdown().await;
        }
    }
}

async fn wait_gateway(gateway: Option<&SignalGateway>) {
    match gateway {
        Some(gw) => gw.wait_armed(GATEWAY_POLL).await,
        None => std::future::pending().await,
    }
}

/// Forwards bus events to the subscriber set until closed; drains what is buffered on close.
async fn subscriber_listener(
    mut rx: broadcast::Receiver<Event>,
    set: Arc<SubscriberSet>,
    closing: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber listener lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = closing.cancelled() => {
                while let Ok(ev) = rx.try_recv() {
                    set.emit(&ev);
                }
                break;
            }
        }
    }
}
