#![cfg(unix)]

mod common;

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use pilotvisor::{FORCED_EXIT_CODE, Idle, NodeState, Origin, ProcessSpec, TaskError};

use common::{fast_config, supervisor};

const AGENT: &str = env!("CARGO_BIN_EXE_pilot-agent");

fn agent(uid: &str) -> Command {
    let mut cmd = Command::new(AGENT);
    cmd.args(["--uid", uid])
        .env("RUST_LOG", "warn")
        .env("PILOT_WATCH_INTERVAL", "0.05")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

fn wait_ready(child: &mut Child) {
    let stdout = child.stdout.take().expect("stdout is piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("agent writes to stdout");
    assert_eq!(line.trim(), "READY");
}

fn signal(child: &Child, sig: Signal) {
    kill(Pid::from_raw(child.id() as i32), sig).expect("agent is signalable");
}

fn wait_exit(child: &mut Child, limit: Duration) -> ExitStatus {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("agent can be waited on") {
            return status;
        }
        if started.elapsed() > limit {
            let _ = child.kill();
            panic!("agent still running after {limit:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[tokio::test]
async fn failing_agent_worker_fails_the_launching_root() {
    let log = tempfile::NamedTempFile::new().unwrap();
    // The agent's stderr goes to `log`; `exec` keeps its exit status.
    let script = format!(
        "exec '{AGENT}' --uid agent-1 --work-ms 10 2>'{}'",
        log.path().display()
    );

    let cfg = fast_config();
    let sup = supervisor(cfg.clone());
    let root = sup.thread(
        "root",
        Arc::new(Idle::with_init(move |ctx| {
            let spec = ProcessSpec::new("sh")
                .args(["-c", script.as_str()])
                .env("PILOT_RAISE_ON_AGENT_1_WORKER_2_WORK", "3")
                .env("PILOT_WATCH_INTERVAL", "0.05")
                .env("RUST_LOG", "warn")
                .quiet();
            ctx.spawn_process("agent-1", spec)
                .map_err(|e| TaskError::fail(e.to_string()))?;
            Ok(())
        })),
    );
    root.start(sup.owner()).unwrap();

    let bound = cfg.grace + Duration::from_secs(1);
    let state = tokio::time::timeout(bound, root.terminated())
        .await
        .expect("root fails within its grace once the agent exits");
    assert_eq!(state, NodeState::Failed);

    let cond = root.termination().unwrap();
    assert_eq!(cond.origin, Origin::Internal);
    assert_eq!(&*cond.cause, "agent-1");

    let logged = std::fs::read_to_string(log.path()).unwrap();
    let line = logged
        .lines()
        .find(|l| l.contains("unsolicited child exit"))
        .unwrap_or_else(|| panic!("no watcher report in agent log:\n{logged}"));
    assert!(line.contains("agent-1.worker.2"), "{line}");
}

#[test]
fn one_signal_stops_the_agent_gracefully() {
    let mut child = agent("agent-soft").spawn().expect("agent binary starts");
    wait_ready(&mut child);

    signal(&child, Signal::SIGTERM);
    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}

#[test]
fn second_signal_exits_immediately() {
    let mut child = agent("agent-stubborn")
        .args(["--stubborn-ms", "30000"])
        .spawn()
        .expect("agent binary starts");
    wait_ready(&mut child);

    signal(&child, Signal::SIGTERM);
    std::thread::sleep(Duration::from_millis(300));
    let started = Instant::now();
    signal(&child, Signal::SIGTERM);

    let status = wait_exit(&mut child, Duration::from_secs(5));
    assert_eq!(status.code(), Some(FORCED_EXIT_CODE));
    assert!(started.elapsed() < Duration::from_secs(2));
}
