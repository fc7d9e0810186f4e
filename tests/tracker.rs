use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pilotvisor::{
    Bus, Config, ControlChannel, ControlCommand, ControlHandler, ControlMessage, EntityType,
    FaultInjector, JobDescription, JobHandle, LocalChannel, NodeState, PILOT_COMMAND_TOPIC,
    PilotState, RemoteError, RemoteExecution, RemoteJobTracker, RemoteState, Supervisor,
    TrackerComponent, TrackerError,
};

/// Remote service whose answers the test controls.
#[derive(Default)]
struct FakeRemote {
    states: Mutex<HashMap<String, RemoteState>>,
    canceled: Mutex<Vec<String>>,
    bulk_calls: AtomicUsize,
    submitted: AtomicUsize,
    failing: AtomicBool,
}

impl FakeRemote {
    fn set(&self, id: &str, state: RemoteState) {
        self.states.lock().insert(id.to_string(), state);
    }

    fn forget(&self, id: &str) {
        self.states.lock().remove(id);
    }
}

#[async_trait]
impl RemoteExecution for FakeRemote {
    async fn submit(&self, _job: &JobDescription) -> Result<JobHandle, RemoteError> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake.{n}");
        self.set(&id, RemoteState::Pending);
        Ok(JobHandle::new(id))
    }

    async fn bulk_state(&self, jobs: &[JobHandle]) -> Result<HashMap<String, RemoteState>, RemoteError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Call {
                call: "bulk_state",
                reason: "service unavailable".into(),
            });
        }
        let states = self.states.lock();
        Ok(jobs
            .iter()
            .filter_map(|h| states.get(&h.id).map(|s| (h.id.clone(), *s)))
            .collect())
    }

    async fn cancel(&self, jobs: &[JobHandle]) -> Result<(), RemoteError> {
        // Records the request but never acknowledges it.
        self.canceled.lock().extend(jobs.iter().map(|h| h.id.clone()));
        Ok(())
    }

    async fn wait_terminal(&self, _jobs: &[JobHandle], _timeout: Duration) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Channel whose soft commands never complete.
#[derive(Default)]
struct StalledChannel {
    published: Mutex<Vec<(String, PilotState)>>,
}

#[async_trait]
impl ControlChannel for StalledChannel {
    async fn publish(&self, _entity: EntityType, uid: &str, state: PilotState) -> Result<(), RemoteError> {
        self.published.lock().push((uid.to_string(), state));
        Ok(())
    }

    async fn command(&self, _msg: ControlMessage) -> Result<(), RemoteError> {
        std::future::pending().await
    }

    async fn subscribe(&self, _topic: &str, _handler: Arc<dyn ControlHandler>) -> Result<(), RemoteError> {
        Ok(())
    }
}

fn config() -> Config {
    Config {
        poll_interval: Duration::from_secs(10),
        cancel_delay: Duration::from_secs(60),
        cancel_wait: Duration::from_secs(5),
        max_misses: 3,
        watch_interval: Duration::from_millis(50),
        ..Config::default()
    }
}

fn setup(jobs: usize) -> (Arc<FakeRemote>, Arc<LocalChannel>, Arc<RemoteJobTracker>) {
    let remote = Arc::new(FakeRemote::default());
    let channel = Arc::new(LocalChannel::new());
    let tracker = Arc::new(RemoteJobTracker::new(
        "pmgr.0000",
        remote.clone(),
        channel.clone(),
        &config(),
        Bus::new(256),
    ));
    for i in 0..jobs {
        let id = format!("job.{i}");
        remote.set(&id, RemoteState::Running);
        tracker.track(format!("pilot.{i}"), JobHandle::new(id));
    }
    (remote, channel, tracker)
}

#[tokio::test(start_paused = true)]
async fn one_cycle_publishes_two_natural_and_one_forced_transition() {
    let (remote, channel, tracker) = setup(5);
    tracker.request_cancel("job.4").unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;

    remote.set("job.0", RemoteState::Done);
    remote.set("job.1", RemoteState::Failed);
    channel.clear();

    let report = tracker.run_cycle().await;
    assert_eq!(remote.bulk_calls.load(Ordering::SeqCst), 1);

    let published = channel.publications();
    assert_eq!(published.len(), 3, "{published:?}");
    assert_eq!(report.published(), 3);
    assert_eq!(channel.states_of("pilot.0"), vec![PilotState::Done]);
    assert_eq!(channel.states_of("pilot.1"), vec![PilotState::Failed]);
    assert_eq!(channel.states_of("pilot.4"), vec![PilotState::Canceled]);
    assert_eq!(report.forced, vec!["job.4".to_string()]);
    assert_eq!(*remote.canceled.lock(), vec!["job.4".to_string()]);

    assert_eq!(tracker.tracked(), 2);
    assert!(!tracker.is_watching("job.0"));
    assert!(tracker.is_watching("job.2"));

    // Published once: the next cycle has nothing to report.
    channel.clear();
    let again = tracker.run_cycle().await;
    assert_eq!(again.published(), 0);
    assert!(channel.publications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_before_the_delay_stays_soft() {
    let (remote, channel, tracker) = setup(1);
    tracker.request_cancel("job.0").unwrap();
    tokio::time::advance(Duration::from_secs(59)).await;

    let report = tracker.run_cycle().await;
    assert_eq!(report.published(), 0);
    assert!(remote.canceled.lock().is_empty());

    // The soft command is delivered by a background task.
    for _ in 0..10 {
        if !channel.commands().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    let soft = channel.commands();
    assert_eq!(soft.len(), 1);
    assert_eq!(soft[0].cmd, ControlCommand::CancelPilot);
    assert_eq!(soft[0].topic(), PILOT_COMMAND_TOPIC);
    assert_eq!(soft[0].uids, vec!["pilot.0".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn repeated_cancel_keeps_the_first_request_time() {
    let (_remote, _channel, tracker) = setup(1);
    tracker.request_cancel("job.0").unwrap();
    let first = tracker.record("job.0").unwrap().cancel_requested_at;

    tokio::time::advance(Duration::from_secs(30)).await;
    tracker.request_cancel("job.0").unwrap();
    assert_eq!(tracker.record("job.0").unwrap().cancel_requested_at, first);

    tokio::time::advance(Duration::from_secs(30)).await;
    let report = tracker.run_cycle().await;
    assert_eq!(report.forced, vec!["job.0".to_string()]);
}

#[tokio::test]
async fn unknown_job_reference_is_rejected() {
    let (_remote, channel, tracker) = setup(1);
    let err = tracker.request_cancel("job.404").unwrap_err();
    assert_eq!(
        err,
        TrackerError::UnknownJobReference {
            job_id: "job.404".into()
        }
    );
    assert!(channel.commands().is_empty());
}

#[tokio::test]
async fn jobs_missing_for_three_polls_are_failed() {
    let (remote, channel, tracker) = setup(2);
    remote.forget("job.1");

    assert_eq!(tracker.run_cycle().await.published(), 0);
    assert_eq!(tracker.record("job.1").unwrap().misses, 1);
    assert_eq!(tracker.run_cycle().await.published(), 0);
    let third = tracker.run_cycle().await;

    assert_eq!(third.missing, vec!["job.1".to_string()]);
    assert_eq!(channel.states_of("pilot.1"), vec![PilotState::Failed]);
    assert!(tracker.record("job.1").is_none());
    assert_eq!(tracker.record("job.0").unwrap().misses, 0);
}

#[tokio::test]
async fn failed_bulk_query_does_not_count_misses() {
    let (remote, channel, tracker) = setup(1);
    remote.forget("job.0");
    remote.failing.store(true, Ordering::SeqCst);

    for _ in 0..5 {
        assert_eq!(tracker.run_cycle().await.published(), 0);
    }
    assert_eq!(tracker.record("job.0").unwrap().misses, 0);
    assert!(channel.publications().is_empty());
}

#[tokio::test]
async fn cancel_commands_are_filtered_by_manager() {
    let (_remote, channel, tracker) = setup(3);
    tracker.attach().await.unwrap();

    channel
        .command(ControlMessage::cancel_pilots("pmgr.0000", vec!["pilot.1".into()]))
        .await
        .unwrap();
    channel
        .command(ControlMessage::cancel_pilots("pmgr.9999", vec!["pilot.2".into()]))
        .await
        .unwrap();

    assert!(tracker.record("job.1").unwrap().cancel_requested_at.is_some());
    assert!(tracker.record("job.2").unwrap().cancel_requested_at.is_none());
}

#[tokio::test]
async fn submit_tracks_the_new_job() {
    let (remote, _channel, tracker) = setup(0);
    let handle = tracker
        .submit("pilot.x", &JobDescription::new("/bin/agent"))
        .await
        .unwrap();
    assert_eq!(remote.submitted.load(Ordering::SeqCst), 1);
    let record = tracker.record(&handle.id).unwrap();
    assert_eq!(record.pilot_uid, "pilot.x");
    assert_eq!(record.state, PilotState::PmgrActivePending);
    assert!(tracker.is_watching(&handle.id));
}

#[tokio::test(start_paused = true)]
async fn requested_cancel_is_observed_within_delay_plus_poll() {
    let cfg = config();
    let (_remote, channel, tracker) = setup(1);
    let sup = Supervisor::builder(cfg.clone())
        .with_faults(FaultInjector::disabled())
        .build()
        .unwrap();

    let node = sup.thread("tracker", TrackerComponent::arc(Arc::clone(&tracker)));
    node.start(sup.owner()).unwrap();

    let requested = tokio::time::Instant::now();
    tracker.request_cancel("job.0").unwrap();

    let bound = cfg.cancel_delay + cfg.poll_interval;
    let observed = tokio::time::timeout(bound, async {
        while !channel.states_of("pilot.0").contains(&PilotState::Canceled) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
    .await;
    assert!(observed.is_ok(), "not canceled within {bound:?}");
    assert!(requested.elapsed() >= cfg.cancel_delay);

    let report = node.stop(sup.owner(), Duration::from_secs(1)).await.unwrap();
    assert_eq!(report.state, NodeState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn request_cancel_does_not_wait_for_the_control_channel() {
    let remote = Arc::new(FakeRemote::default());
    let channel = Arc::new(StalledChannel::default());
    let tracker = RemoteJobTracker::new("pmgr.0000", remote.clone(), channel.clone(), &config(), Bus::new(64));
    remote.set("job.0", RemoteState::Running);
    tracker.track("pilot.0", JobHandle::new("job.0"));

    let before = tokio::time::Instant::now();
    tracker.request_cancel("job.0").unwrap();
    assert_eq!(before.elapsed(), Duration::ZERO);
    assert!(tracker.record("job.0").unwrap().cancel_requested_at.is_some());

    // The stalled delivery does not hold back the forced path either.
    tokio::time::advance(Duration::from_secs(61)).await;
    let report = tracker.run_cycle().await;
    assert_eq!(report.forced, vec!["job.0".to_string()]);
    assert_eq!(
        *channel.published.lock(),
        vec![("pilot.0".to_string(), PilotState::Canceled)]
    );
}
