//! # Pilot session demo
//!
//! Runs a pilot manager tree in-process:
//!
//! ```text
//! Supervisor
//!   └─ pmgr            (root: spawns the two services below)
//!        ├─ pmgr.launcher   (LauncherComponent, fed by an mpsc queue)
//!        └─ pmgr.tracker    (TrackerComponent, polls LocalExecution)
//! ```
//!
//! Two pilots are launched as local `sleep` jobs. The short one finishes on its
//! own (`DONE`); the long one is canceled through the control channel and is
//! forced `CANCELED` once the cancellation delay expires. Ctrl-C at any point
//! stops the tree gracefully; a second Ctrl-C exits immediately.
//!
//! ```bash
//! RUST_LOG=info cargo run --example pilot_session
//! ```

use std::sync::Arc;
use std::time::Duration;

use pilotvisor::{
    Config, ControlChannel, ControlMessage, Counters, Idle, JobDescription, LauncherComponent,
    LocalChannel, LocalExecution, LogWriter, PilotDescription, PilotLauncher, PilotState,
    RemoteJobTracker, ResourceRegistry, Subscribe, Supervisor, TaskError, TrackerComponent,
};
use tracing_subscriber::EnvFilter;

const MANAGER: &str = "pmgr.0000";

const RESOURCES: &str = r#"{
  "local.localhost": {
    "schemas": { "fork": "fork://localhost/" },
    "default_schema": "fork",
    "lrms": "FORK",
    "agent_launch_method": "FORK",
    "task_launch_method": "FORK"
  }
}"#;

fn sleeper(uid: &str, secs: &str) -> PilotDescription {
    PilotDescription {
        uid: uid.to_string(),
        resource: "local.localhost".to_string(),
        access_schema: None,
        job: JobDescription::new("sleep").arg(secs),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cfg = Config {
        grace: Duration::from_secs(5),
        hard: Duration::from_secs(1),
        watch_interval: Duration::from_millis(200),
        poll_interval: Duration::from_millis(500),
        cancel_delay: Duration::from_secs(2),
        cancel_wait: Duration::from_secs(3),
        ..Config::default()
    };

    let counters = Arc::new(Counters::new());
    let sup = Supervisor::builder(cfg.clone())
        .with_owner_name("pilot-session")
        .with_subscribers(vec![
            Arc::new(LogWriter) as Arc<dyn Subscribe>,
            Arc::clone(&counters) as Arc<dyn Subscribe>,
        ])
        .with_signal_gateway()
        .build()?;

    let channel = Arc::new(LocalChannel::new());
    let tracker = Arc::new(RemoteJobTracker::new(
        MANAGER,
        Arc::new(LocalExecution::new()),
        channel.clone(),
        &cfg,
        sup.bus().clone(),
    ));
    let launcher = Arc::new(PilotLauncher::new(
        ResourceRegistry::from_json(RESOURCES)?,
        Arc::clone(&tracker),
        channel.clone(),
    ));
    let (batches, launcher_node) = LauncherComponent::channel(launcher, 8);
    let tracker_node = TrackerComponent::arc(Arc::clone(&tracker));

    let root = sup.thread(
        MANAGER,
        Arc::new(Idle::with_init(move |ctx| {
            ctx.spawn_thread(format!("{}.launcher", ctx.uid()), Arc::clone(&launcher_node))
                .map_err(|e| TaskError::fail(e.to_string()))?;
            ctx.spawn_thread(format!("{}.tracker", ctx.uid()), Arc::clone(&tracker_node))
                .map_err(|e| TaskError::fail(e.to_string()))?;
            Ok(())
        })),
    );

    let session = async {
        batches
            .send(vec![sleeper("pilot.0000", "1"), sleeper("pilot.0001", "600")])
            .await?;

        wait_for(&channel, "pilot.0001", PilotState::PmgrActivePending).await;
        channel
            .command(ControlMessage::cancel_pilots(MANAGER, vec!["pilot.0001".into()]))
            .await?;

        wait_for(&channel, "pilot.0000", PilotState::Done).await;
        wait_for(&channel, "pilot.0001", PilotState::Canceled).await;
        sup.request_shutdown();
        anyhow::Ok(())
    };

    // A signal can end the run before the session script finishes.
    let outcome = {
        let run = sup.run(&root);
        tokio::pin!(run);
        tokio::select! {
            outcome = &mut run => outcome?,
            session = session => {
                session?;
                run.await?
            }
        }
    };

    for p in channel.publications() {
        println!("{:<12} {}", p.uid, p.state);
    }
    println!("root: {} (leaked {})", outcome.state, outcome.leaked.len());

    sup.close().await;
    println!("{:?}", counters.snapshot());
    std::process::exit(outcome.exit_code());
}

async fn wait_for(channel: &LocalChannel, uid: &str, state: PilotState) {
    while !channel.states_of(uid).contains(&state) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
