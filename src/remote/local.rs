//! Local subprocess execution backend.
//!
//! Runs each [`JobDescription`] as a child process of the current process.
//! `cancel` sends `SIGTERM`; `wait_terminal` polls until every job exited and
//! kills the survivors at its deadline.
//!
//! A job is dropped from the table once a terminal state has been reported by
//! `bulk_state`, or once `wait_terminal` saw it exit. Later queries treat it as
//! unknown.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::debug;

use crate::error::RemoteError;
use crate::remote::collaborator::RemoteExecution;
use crate::remote::types::{JobDescription, JobHandle, RemoteState};

const WAIT_POLL: Duration = Duration::from_millis(100);

struct LocalJob {
    child: Child,
    canceled: bool,
    last: Option<RemoteState>,
}

impl LocalJob {
    fn state(&mut self) -> RemoteState {
        if let Some(last) = self.last {
            return last;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let state = if self.canceled {
                    RemoteState::Canceled
                } else if status.success() {
                    RemoteState::Done
                } else {
                    RemoteState::Failed
                };
                self.last = Some(state);
                state
            }
            Ok(None) => RemoteState::Running,
            Err(e) => {
                debug!(error = %e, "try_wait failed");
                RemoteState::Unknown
            }
        }
    }
}

#[derive(Default)]
pub struct LocalExecution {
    jobs: Mutex<HashMap<String, LocalJob>>,
    seq: AtomicU64,
}

impl LocalExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a job from the backend; later queries no longer mention it.
    pub fn forget(&self, job_id: &str) -> bool {
        self.jobs.lock().remove(job_id).is_some()
    }

    /// Number of jobs still held, running or not yet reported.
    pub fn held(&self) -> usize {
        self.jobs.lock().len()
    }

    fn command(job: &JobDescription) -> Command {
        let mut cmd = Command::new(&job.executable);
        cmd.args(&job.arguments)
            .envs(&job.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &job.working_directory {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Drops the given jobs once none of them runs; returns whether it did.
    fn reap_if_terminal(&self, jobs: &[JobHandle]) -> bool {
        let mut table = self.jobs.lock();
        let done = jobs.iter().all(|h| match table.get_mut(&h.id) {
            Some(job) => job.state() != RemoteState::Running,
            None => true,
        });
        if done {
            for handle in jobs {
                table.remove(&handle.id);
            }
        }
        done
    }
}

#[async_trait]
impl RemoteExecution for LocalExecution {
    async fn submit(&self, job: &JobDescription) -> Result<JobHandle, RemoteError> {
        let child = Self::command(job).spawn().map_err(|e| RemoteError::Submit {
            reason: format!("{}: {e}", job.executable),
        })?;
        let id = format!("local.{:04}", self.seq.fetch_add(1, Ordering::Relaxed));
        self.jobs.lock().insert(
            id.clone(),
            LocalJob {
                child,
                canceled: false,
                last: None,
            },
        );
        Ok(JobHandle {
            id,
            endpoint: job.endpoint.clone(),
        })
    }

    async fn bulk_state(&self, jobs: &[JobHandle]) -> Result<HashMap<String, RemoteState>, RemoteError> {
        let mut table = self.jobs.lock();
        let states: HashMap<String, RemoteState> = jobs
            .iter()
            .filter_map(|h| table.get_mut(&h.id).map(|job| (h.id.clone(), job.state())))
            .collect();
        for (id, state) in &states {
            if state.terminal().is_some() {
                table.remove(id);
            }
        }
        Ok(states)
    }

    async fn cancel(&self, jobs: &[JobHandle]) -> Result<(), RemoteError> {
        let mut table = self.jobs.lock();
        for handle in jobs {
            if let Some(job) = table.get_mut(&handle.id) {
                job.canceled = true;
                terminate(&mut job.child);
            }
        }
        Ok(())
    }

    async fn wait_terminal(&self, jobs: &[JobHandle], timeout: Duration) -> Result<(), RemoteError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.reap_if_terminal(jobs) {
                return Ok(());
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
        if self.reap_if_terminal(jobs) {
            return Ok(());
        }

        let mut table = self.jobs.lock();
        let mut survivors = 0usize;
        for handle in jobs {
            if let Some(job) = table.get_mut(&handle.id) {
                if job.state() == RemoteState::Running {
                    let _ = job.child.start_kill();
                    survivors += 1;
                }
            }
        }
        Err(RemoteError::Call {
            call: "wait_terminal",
            reason: format!("{survivors} job(s) still running after {timeout:?}; killed"),
        })
    }
}

fn terminate(child: &mut Child) {
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
        let _ = child.start_kill();
    }
}
