//! # Process node driver.
//!
//! A process node's lifetime is its child process's lifetime:
//! - graceful request: `SIGTERM` (the child's signal gateway arms its own flag)
//! - forced interrupt: `SIGKILL` by pid, and the driver task is aborted
//!   (`kill_on_drop` reaps the child)
//!
//! Exit code 0, or death by `SIGTERM` after a requested stop, ends the node
//! `Stopped`; any other exit ends it `Failed` with the exit status as cause.

use std::process::ExitStatus;

use tokio::process::Child;
use tracing::{debug, info};

use crate::core::driver;
use crate::error::NodeError;
use crate::events::{Event, EventKind};
use crate::node::{Node, NodeState, ProcessSpec, TerminationCondition};

/// Spawns the child process and its driver. Spawn failures end the node `Failed`.
pub(crate) fn spawn(node: &Node, spec: &ProcessSpec) -> Result<(), NodeError> {
    let child = match spec.command().spawn() {
        Ok(child) => child,
        Err(e) => {
            let reason = format!("{}: {e}", spec.program().to_string_lossy());
            node.record_condition(TerminationCondition::internal(
                node.uid().clone(),
                format!("spawn failed: {reason}"),
            ));
            node.settle(NodeState::Failed);
            node.shared().bus.publish(
                Event::new(EventKind::NodeFailed)
                    .with_node(node.uid())
                    .with_reason(reason.clone()),
            );
            return Err(NodeError::Spawn {
                uid: node.uid().clone(),
                reason,
            });
        }
    };
    node.set_pid(child.id());

    let work = tokio::spawn(drive(node.clone(), child));
    node.set_abort(work.abort_handle());
    tokio::spawn(driver::monitor(node.clone(), work));
    Ok(())
}

async fn drive(node: Node, mut child: Child) -> NodeState {
    info!(node = %node.uid(), pid = ?child.id(), "process node starting");
    node.shared().bus.publish(
        Event::new(EventKind::NodeStarting)
            .with_node(node.uid())
            .with_state(node.kind().to_string()),
    );

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = node.flag().cancelled() => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            node.enter_stopping();
            request_exit(&mut child);
            child.wait().await
        }
    };
    node.set_pid(None);

    match status {
        Ok(status) if exited_cleanly(&status, node.stop_requested()) => NodeState::Stopped,
        Ok(status) => {
            node.record_condition(TerminationCondition::internal(
                node.uid().clone(),
                format!("exited with {status}"),
            ));
            NodeState::Failed
        }
        Err(e) => {
            node.record_condition(TerminationCondition::internal(
                node.uid().clone(),
                format!("wait failed: {e}"),
            ));
            NodeState::Failed
        }
    }
}

fn exited_cleanly(status: &ExitStatus, stop_requested: bool) -> bool {
    if status.success() {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        stop_requested && status.signal() == Some(libc::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        let _ = stop_requested;
        false
    }
}

/// Graceful request: `SIGTERM` on unix, kill elsewhere.
fn request_exit(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM delivery failed");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "kill request failed");
        }
    }
}

/// Forced interrupt by pid.
pub(crate) fn kill(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "SIGKILL delivery failed");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn sigterm_is_clean_only_when_requested() {
        let by_sigterm = ExitStatus::from_raw(libc::SIGTERM);
        assert!(exited_cleanly(&by_sigterm, true));
        assert!(!exited_cleanly(&by_sigterm, false));

        let code_one = ExitStatus::from_raw(1 << 8);
        assert!(!exited_cleanly(&code_one, true));
        assert!(exited_cleanly(&ExitStatus::from_raw(0), false));
    }
}
