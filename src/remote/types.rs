//! Remote-side data model: pilot states, job descriptions, control messages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Topic the pilot manager listens on for control commands.
pub const CONTROL_TOPIC: &str = "control";
/// Topic the pilot agents listen on for commands addressed to them.
pub const PILOT_COMMAND_TOPIC: &str = "pilot_command";

/// Published lifecycle state of a pilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PilotState {
    New,
    PmgrLaunchingPending,
    PmgrLaunching,
    PmgrActivePending,
    Active,
    Done,
    Failed,
    Canceled,
}

impl PilotState {
    /// Wire label (`PMGR_LAUNCHING`, `DONE`, ...).
    pub fn as_label(&self) -> &'static str {
        match self {
            PilotState::New => "NEW",
            PilotState::PmgrLaunchingPending => "PMGR_LAUNCHING_PENDING",
            PilotState::PmgrLaunching => "PMGR_LAUNCHING",
            PilotState::PmgrActivePending => "PMGR_ACTIVE_PENDING",
            PilotState::Active => "ACTIVE",
            PilotState::Done => "DONE",
            PilotState::Failed => "FAILED",
            PilotState::Canceled => "CANCELED",
        }
    }

    /// `Done`, `Failed`, or `Canceled`.
    pub fn is_final(&self) -> bool {
        matches!(self, PilotState::Done | PilotState::Failed | PilotState::Canceled)
    }
}

impl fmt::Display for PilotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Job state as reported by the remote execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteState {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
    Unknown,
}

impl RemoteState {
    /// Pilot state to publish if the remote state is terminal.
    pub fn terminal(&self) -> Option<PilotState> {
        match self {
            RemoteState::Done => Some(PilotState::Done),
            RemoteState::Failed => Some(PilotState::Failed),
            RemoteState::Canceled => Some(PilotState::Canceled),
            RemoteState::Pending | RemoteState::Running | RemoteState::Unknown => None,
        }
    }
}

/// Kind of entity a state publication refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Pilot,
    Unit,
}

impl EntityType {
    pub fn as_label(&self) -> &'static str {
        match self {
            EntityType::Pilot => "pilot",
            EntityType::Unit => "unit",
        }
    }
}

/// What to run on a remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    pub executable: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Job manager endpoint; filled in by the launcher from the resource config.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub cores: Option<u32>,
    /// Walltime in minutes.
    #[serde(default)]
    pub walltime: Option<u32>,
}

impl JobDescription {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Remote reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    /// Remote job id, unique per collaborator.
    pub id: String,
    /// Endpoint the job was submitted to.
    pub endpoint: Option<String>,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: None,
        }
    }
}

/// A pilot to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotDescription {
    pub uid: String,
    /// Resource label in the [`ResourceRegistry`](crate::ResourceRegistry).
    pub resource: String,
    #[serde(default)]
    pub access_schema: Option<String>,
    pub job: JobDescription,
}

/// Control command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Manager-level request to cancel the listed pilots.
    CancelPilots,
    /// Per-pilot soft cancel forwarded to the agent.
    CancelPilot,
}

impl ControlCommand {
    /// Topic the command travels on.
    pub fn topic(&self) -> &'static str {
        match self {
            ControlCommand::CancelPilots => CONTROL_TOPIC,
            ControlCommand::CancelPilot => PILOT_COMMAND_TOPIC,
        }
    }
}

/// A command on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub cmd: ControlCommand,
    /// Addressed manager id.
    pub manager: String,
    /// Pilot uids (or job ids) the command applies to.
    pub uids: Vec<String>,
}

impl ControlMessage {
    pub fn cancel_pilots(manager: impl Into<String>, uids: Vec<String>) -> Self {
        Self {
            cmd: ControlCommand::CancelPilots,
            manager: manager.into(),
            uids,
        }
    }

    pub fn cancel_pilot(manager: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            cmd: ControlCommand::CancelPilot,
            manager: manager.into(),
            uids: vec![uid.into()],
        }
    }

    pub fn topic(&self) -> &'static str {
        self.cmd.topic()
    }
}

/// Tracker bookkeeping for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobRecord {
    pub job_id: String,
    pub pilot_uid: String,
    pub handle: JobHandle,
    /// First time a cancel was requested; later requests keep it.
    pub cancel_requested_at: Option<Instant>,
    /// Last state the tracker published for the pilot.
    pub state: PilotState,
    /// Consecutive bulk answers that did not mention the job.
    pub misses: u32,
}

impl RemoteJobRecord {
    pub(crate) fn new(pilot_uid: impl Into<String>, handle: JobHandle) -> Self {
        Self {
            job_id: handle.id.clone(),
            pilot_uid: pilot_uid.into(),
            handle,
            cancel_requested_at: None,
            state: PilotState::PmgrActivePending,
            misses: 0,
        }
    }
}
