//! Runtime core: node drivers, watchers, escalation, signals, and the supervisor.
//!
//! The public API from this module is [`Supervisor`] (with its builder),
//! [`EscalationPolicy`], and the [`SignalGateway`].
//!
//! Internal modules:
//! - [`driver`]: thread node main loop and the monitor that publishes terminal states;
//! - [`process`]: process node driver (SIGTERM / SIGKILL);
//! - [`registry`]: children of one node;
//! - [`watcher`]: unsolicited-exit detection;
//! - [`escalation`]: arm, join with grace, force, join with hard, report leaks;
//! - [`gateway`]: raw SIGINT/SIGTERM handler over a static flag;
//! - [`supervisor`]: root ownership and the top-level control loop.
//!
//! ## Wiring
//! ```text
//! Supervisor ──owns──► root Node ──driver──► Component stages
//!                          │
//!                          ├── Registry ──► child Nodes (thread | process)
//!                          └── Watcher ───► samples children, posts conditions to root
//!
//! stop(root) ──► EscalationPolicy ──► root driver exits loop
//!                                         └─► EscalationPolicy over its children ─► ...
//! ```

mod builder;
pub(crate) mod driver;
pub(crate) mod escalation;
pub(crate) mod gateway;
pub(crate) mod process;
pub(crate) mod registry;
pub(crate) mod shared;
mod supervisor;
pub(crate) mod watcher;

pub use builder::SupervisorBuilder;
pub use escalation::{EscalationPolicy, EscalationReport, EscalationTimer};
pub use gateway::{FORCED_EXIT_CODE, SignalAction, SignalGateway, on_signal};
pub use supervisor::{RunOutcome, Supervisor};
