//! # pilotvisor
//!
//! **Pilotvisor** is the supervision core of a pilot-based job platform.
//!
//! A control process submits *pilots* (agent jobs) to remote resources. Every
//! pilot runs a tree of supervised workers. This crate provides:
//! - hierarchical [`Node`] supervision (runtime tasks and OS processes);
//! - unsolicited-exit detection by per-node watchers;
//! - bounded termination through the [`EscalationPolicy`] (graceful, then forced);
//! - a process-wide [`SignalGateway`] (first signal arms, second exits);
//! - remote job tracking with delayed forced cancellation ([`RemoteJobTracker`]).
//!
//! ## Architecture
//! ```text
//!  ┌──────────────────────────────────────────────────────────────────┐
//!  │ Supervisor                                                       │
//!  │  - Bus (broadcast events) ──► SubscriberSet (LogWriter, Counters) │
//!  │  - SignalGateway (optional)                                      │
//!  │  - Owner of the root node                                        │
//!  └──────┬───────────────────────────────────────────────────────────┘
//!         ▼
//!      root Node ── Watcher ──┐
//!       ├── PilotLauncher     │ samples children, posts unsolicited exits
//!       ├── TrackerComponent ─┤
//!       │     └─ RemoteJobTracker ── RemoteExecution / ControlChannel
//!       └── agent (process) ──┘
//!             └─ pilot-agent: its own Supervisor, root, workers
//! ```
//!
//! ## Termination
//! ```text
//! stop(node):  arm flag ─► join ≤ grace ─► force ─► join ≤ hard ─► leaked: Failed
//!   driver:    exit loop ─► escalate own children (child_grace, hard) ─► finalize
//! ```
//! Each level hands its children what remains of its own grace, minus a reserve for
//! their hard interrupt. A tree of any depth therefore terminates within the root's
//! `grace + hard`, and within `grace` when every node cooperates. A node whose
//! children leaked ends `Failed`.
//!
//! ## Features
//! | Area              | Description                                                      | Key types                                 |
//! |-------------------|------------------------------------------------------------------|-------------------------------------------|
//! | **Nodes**         | Thread / process units with a forward-only state machine          | [`Node`], [`NodeState`], [`Component`]    |
//! | **Escalation**    | Arm, join with grace, force, join with hard timeout               | [`EscalationPolicy`], [`EscalationReport`] |
//! | **Signals**       | Raw SIGINT/SIGTERM handler over one atomic flag                   | [`SignalGateway`]                         |
//! | **Remote jobs**   | Bulk polling, exactly-once terminal publication, forced cancel    | [`RemoteJobTracker`], [`PilotLauncher`]   |
//! | **Events**        | Broadcast bus with bounded per-subscriber queues                  | [`Event`], [`Subscribe`], [`Counters`]    |
//! | **Faults**        | `PILOT_RAISE_ON_<TAG>` injection at named points                  | [`FaultInjector`]                         |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pilotvisor::{Config, LogWriter, NodeContext, Supervisor, TaskError, WorkFn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(Config::from_env()?)
//!         .with_subscribers(vec![Arc::new(LogWriter)])
//!         .build()?;
//!
//!     let root = sup.thread(
//!         "root",
//!         WorkFn::arc(|ctx: NodeContext| async move {
//!             ctx.idle(Duration::from_secs(1)).await;
//!             Ok::<_, TaskError>(())
//!         }),
//!     );
//!     sup.request_shutdown();
//!     let outcome = sup.run(&root).await?;
//!     assert_eq!(outcome.exit_code(), 0);
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod faults;
mod node;
mod remote;
mod subscribers;

// ---- Public re-exports ----

pub use config::{Config, LaunchParams, ResourceConfig, ResourceRegistry};
pub use core::{
    EscalationPolicy, EscalationReport, EscalationTimer, FORCED_EXIT_CODE, RunOutcome,
    SignalAction, SignalGateway, Supervisor, SupervisorBuilder, on_signal,
};
pub use error::{
    ConfigError, EscalationError, GatewayError, NodeError, RemoteError, RuntimeError,
    TaskError, TrackerError,
};
pub use events::{Bus, Event, EventKind};
pub use faults::{FaultInjector, Trigger};
pub use node::{
    Component, ComponentRef, Idle, Node, NodeContext, NodeId, NodeKind, NodeState, Origin,
    Owner, ProcessSpec, StopReport, TerminationCondition, WorkFn,
};
pub use remote::{
    CONTROL_TOPIC, ControlChannel, ControlCommand, ControlHandler, ControlMessage, CycleReport,
    EntityType, JobDescription, JobHandle, LaunchReport, LauncherComponent, LocalChannel,
    LocalExecution, PILOT_COMMAND_TOPIC, PILOT_UID_ENV, PilotDescription, PilotLauncher,
    PilotState, Publication, RemoteExecution, RemoteJobRecord, RemoteJobTracker, RemoteState,
    TRACKER_FAULT_TAG, TrackerComponent,
};
pub use subscribers::{Counters, CountersSnapshot, LogWriter, Subscribe, SubscriberSet};
