//! # Remote jobs: pilots submitted to resources this process does not own.
//!
//! - [`RemoteExecution`] / [`ControlChannel`]: collaborator seams (async traits)
//! - [`RemoteJobTracker`]: bulk polling, exactly-once terminal publication,
//!   delayed forced cancel, missing-job detection
//! - [`PilotLauncher`]: bucketed submission with eager config validation
//! - [`TrackerComponent`] / [`LauncherComponent`]: both as thread nodes
//! - [`LocalChannel`] / [`LocalExecution`]: in-process collaborators
//!
//! ```text
//!  control topic ──cancel_pilots──► tracker.request_cancel ──cancel_pilot──► pilot_command topic
//!                                         │ cancel_requested_at
//!  TrackerComponent: idle(poll) ─► run_cycle ─► bulk_state ─► publish DONE/FAILED/CANCELED
//!                                         └─► overdue? cancel + wait_terminal ─► publish CANCELED
//! ```

mod channel;
mod collaborator;
mod launcher;
mod local;
mod tracker;
mod types;

pub use channel::{LocalChannel, Publication};
pub use collaborator::{ControlChannel, ControlHandler, RemoteExecution};
pub use launcher::{LaunchReport, LauncherComponent, PILOT_UID_ENV, PilotLauncher};
pub use local::LocalExecution;
pub use tracker::{CycleReport, RemoteJobTracker, TRACKER_FAULT_TAG, TrackerComponent};
pub use types::{
    CONTROL_TOPIC, ControlCommand, ControlMessage, EntityType, JobDescription, JobHandle,
    PILOT_COMMAND_TOPIC, PilotDescription, PilotState, RemoteJobRecord, RemoteState,
};
