//! Error types used by the pilotvisor runtime, nodes, and the remote tracker.
//!
//! - [`NodeError`] - misuse of a [`Node`](crate::Node) handle (double start, foreign owner).
//! - [`TaskError`] - failures raised by a [`Component`](crate::Component) stage.
//! - [`EscalationError`] - escalation outcomes that are recorded, never returned from `stop()`.
//! - [`TrackerError`] / [`RemoteError`] - remote job tracking and collaborator failures.
//! - [`ConfigError`] - configuration and launch-parameter validation.
//! - [`GatewayError`] - signal gateway installation.
//! - [`RuntimeError`] - top-level [`Supervisor`](crate::Supervisor) failures.
//!
//! Every enum provides `as_label` (stable snake_case, for logs/metrics).

use std::time::Duration;
use thiserror::Error;

use crate::node::NodeId;

/// # Errors produced by node handle operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// `start()` was called on a node that already left `Created`.
    #[error("node {uid} already started")]
    AlreadyStarted {
        /// Node that was started twice.
        uid: NodeId,
    },

    /// A party other than the node's exclusive owner tried to control or query it.
    #[error("node {uid} is owned by {owner}, not by {caller}")]
    OwnershipViolation {
        /// Node being accessed.
        uid: NodeId,
        /// Name of the real owner.
        owner: String,
        /// Name of the offending caller.
        caller: String,
    },

    /// The underlying process could not be spawned.
    #[error("node {uid} failed to spawn: {reason}")]
    Spawn {
        /// Node that failed to spawn.
        uid: NodeId,
        /// OS error text.
        reason: String,
    },
}

impl NodeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            NodeError::AlreadyStarted { .. } => "node_already_started",
            NodeError::OwnershipViolation { .. } => "node_ownership_violation",
            NodeError::Spawn { .. } => "node_spawn_failed",
        }
    }
}

/// # Errors produced by component stages (`initialize`, `work`, `finalize`).
///
/// Any of these ends the node in `Failed`, except [`TaskError::Canceled`] which is
/// a graceful exit observed during termination.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Stage failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Fault-injection hook fired.
    #[error("injected fault at '{tag}' (invocation {invocation})")]
    Injected {
        /// Fault tag that fired.
        tag: String,
        /// Invocation count at which it fired (1-based).
        invocation: u64,
    },

    /// Stage noticed termination and bailed out early.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use pilotvisor::TaskError;
    ///
    /// let err = TaskError::fail("boom");
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Injected { .. } => "task_injected_fault",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Fail { error } => format!("error: {error}"),
            TaskError::Fatal { error } => format!("fatal: {error}"),
            TaskError::Injected { tag, invocation } => {
                format!("injected: {tag}#{invocation}")
            }
            TaskError::Canceled => "context cancelled".to_string(),
        }
    }
}

/// # Escalation outcomes.
///
/// These are logged and counted; `stop()` always returns a report instead.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscalationError {
    /// A node survived both the grace join and the forced join.
    #[error("node {uid} still alive after grace {grace:?} and hard {hard:?}; leaked")]
    TerminationTimeout {
        /// Leaked node.
        uid: NodeId,
        /// Grace period that elapsed.
        grace: Duration,
        /// Hard period that elapsed after the forced interrupt.
        hard: Duration,
    },
}

impl EscalationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EscalationError::TerminationTimeout { .. } => "termination_timeout",
        }
    }
}

/// # Failures reported by a remote collaborator.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Submission was refused or failed.
    #[error("submit failed: {reason}")]
    Submit {
        /// Collaborator message.
        reason: String,
    },

    /// A state, cancel, or wait round trip failed.
    #[error("remote call '{call}' failed: {reason}")]
    Call {
        /// Name of the call (`bulk_state`, `cancel`, `wait_terminal`).
        call: &'static str,
        /// Collaborator message.
        reason: String,
    },

    /// Control channel delivery failed.
    #[error("control channel: {reason}")]
    Channel {
        /// Channel message.
        reason: String,
    },
}

/// # Errors produced by the remote job tracker and launcher.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Cancel or query on a job id the tracker never tracked.
    #[error("unknown job reference '{job_id}'")]
    UnknownJobReference {
        /// Offending job id.
        job_id: String,
    },

    /// The remote collaborator reported a failure.
    #[error("remote job failed: {0}")]
    RemoteJobFailed(#[from] RemoteError),

    /// Launch parameters are missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TrackerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TrackerError::UnknownJobReference { .. } => "tracker_unknown_job",
            TrackerError::RemoteJobFailed(_) => "tracker_remote_job_failed",
            TrackerError::Config(_) => "tracker_config",
        }
    }
}

/// # Configuration errors.
///
/// Raised eagerly, before any remote call is attempted.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No configuration exists for the requested resource.
    #[error("no resource configuration for '{resource}'")]
    MissingResource {
        /// Resource name.
        resource: String,
    },

    /// A required launch parameter is absent.
    #[error("resource '{resource}': missing {param}")]
    MissingParameter {
        /// Resource name.
        resource: String,
        /// Parameter name.
        param: &'static str,
    },

    /// A value could not be parsed or is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Setting name (environment variable or field).
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A configuration document failed to parse.
    #[error("cannot parse configuration: {reason}")]
    Parse {
        /// Parser message.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("cannot read configuration {path}: {reason}")]
    Io {
        /// File path.
        path: String,
        /// OS error text.
        reason: String,
    },
}

/// # Signal gateway errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// A gateway already exists in this process.
    #[error("signal gateway already installed")]
    AlreadyInstalled,

    /// Registering the handler failed.
    #[error("cannot install signal handler: {reason}")]
    Install {
        /// OS error text.
        reason: String,
    },
}

/// # Errors produced by the top-level supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The root node could not be started.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The signal gateway could not be installed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Node(e) => e.as_label(),
            RuntimeError::Gateway(_) => "runtime_gateway",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let uid = NodeId::from("w.1");
        assert_eq!(
            NodeError::AlreadyStarted { uid: uid.clone() }.as_label(),
            "node_already_started"
        );
        assert_eq!(
            EscalationError::TerminationTimeout {
                uid,
                grace: Duration::from_secs(1),
                hard: Duration::from_secs(1),
            }
            .as_label(),
            "termination_timeout"
        );
        assert_eq!(
            TrackerError::UnknownJobReference { job_id: "j".into() }.as_label(),
            "tracker_unknown_job"
        );
    }

    #[test]
    fn config_error_converts_into_tracker_error() {
        let err: TrackerError = ConfigError::MissingResource {
            resource: "local.localhost".into(),
        }
        .into();
        assert_eq!(err.as_label(), "tracker_config");
        assert!(err.to_string().contains("local.localhost"));
    }
}
