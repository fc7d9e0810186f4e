//! # Remote job tracker.
//!
//! Tracks jobs submitted to a [`RemoteExecution`] service that cannot be killed
//! synchronously, publishes their terminal states exactly once, and escalates
//! unanswered cancellations to a forced remote cancel.
//!
//! ## Cycle
//! ```text
//! run_cycle():
//!   snapshot watch set            [lock]
//!   bulk_state(handles)           [unlocked, one round trip]
//!   merge:                        [lock]
//!     terminal        → unwatch, remove, queue publication
//!     absent N times  → unwatch, remove, queue FAILED
//!     otherwise       → misses = 0
//!   publish queued transitions    [unlocked]
//!   overdue cancels:              [lock] claim records with now - requested ≥ cancel_delay
//!     cancel + wait_terminal      [unlocked]
//!     publish CANCELED            [unlocked]
//! ```
//!
//! ## Rules
//! - Lock order is `watching` then `records`; neither is held across an await
//! - `request_cancel` only records the first request time and hands the soft
//!   command to a background task; the forced path belongs to `run_cycle` alone
//! - A failed bulk query skips the cycle's miss accounting
//! - Every remote round trip is bounded by `cancel_wait`

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{RemoteError, TaskError, TrackerError};
use crate::events::{Bus, Event, EventKind};
use crate::node::{Component, ComponentRef, NodeContext};
use crate::remote::collaborator::{ControlChannel, ControlHandler, RemoteExecution};
use crate::remote::types::{
    CONTROL_TOPIC, ControlCommand, ControlMessage, EntityType, JobDescription, JobHandle,
    PilotState, RemoteJobRecord, RemoteState,
};

/// Fault tag evaluated before every tracker cycle.
pub const TRACKER_FAULT_TAG: &str = "tracker.cycle";

/// Extra time granted to `wait_terminal` on top of its own timeout.
const WAIT_SLACK: Duration = Duration::from_secs(1);

/// What one [`RemoteJobTracker::run_cycle`] published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Jobs that reached a terminal remote state, with the published state.
    pub natural: Vec<(String, PilotState)>,
    /// Jobs force-cancelled after the cancellation delay.
    pub forced: Vec<String>,
    /// Jobs published `FAILED` after disappearing from the remote answer.
    pub missing: Vec<String>,
}

impl CycleReport {
    /// Number of state transitions published by the cycle.
    pub fn published(&self) -> usize {
        self.natural.len() + self.forced.len() + self.missing.len()
    }
}

/// Tracks remote jobs of one pilot manager.
pub struct RemoteJobTracker {
    manager: String,
    remote: Arc<dyn RemoteExecution>,
    channel: Arc<dyn ControlChannel>,
    cfg: Config,
    bus: Bus,
    watching: Mutex<BTreeSet<String>>,
    records: Mutex<HashMap<String, RemoteJobRecord>>,
}

impl RemoteJobTracker {
    pub fn new(
        manager: impl Into<String>,
        remote: Arc<dyn RemoteExecution>,
        channel: Arc<dyn ControlChannel>,
        cfg: &Config,
        bus: Bus,
    ) -> Self {
        Self {
            manager: manager.into(),
            remote,
            channel,
            cfg: cfg.clone(),
            bus,
            watching: Mutex::new(BTreeSet::new()),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Manager id this tracker answers control commands for.
    pub fn manager(&self) -> &str {
        &self.manager
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Starts tracking an already-submitted job.
    pub fn track(&self, pilot_uid: impl Into<String>, handle: JobHandle) {
        let record = RemoteJobRecord::new(pilot_uid, handle);
        let event = Event::new(EventKind::JobSubmitted)
            .with_job(record.job_id.as_str())
            .with_node(record.pilot_uid.as_str());
        {
            let mut watching = self.watching.lock();
            let mut records = self.records.lock();
            watching.insert(record.job_id.clone());
            records.entry(record.job_id.clone()).or_insert(record);
        }
        self.bus.publish(event);
    }

    /// Submits a job through the remote service and tracks it.
    pub async fn submit(
        &self,
        pilot_uid: impl Into<String>,
        job: &JobDescription,
    ) -> Result<JobHandle, TrackerError> {
        let handle = self
            .bounded("submit", self.cfg.cancel_wait, self.remote.submit(job))
            .await?;
        self.track(pilot_uid, handle.clone());
        Ok(handle)
    }

    /// Number of tracked jobs.
    pub fn tracked(&self) -> usize {
        self.records.lock().len()
    }

    /// Copy of a job's record.
    pub fn record(&self, job_id: &str) -> Option<RemoteJobRecord> {
        self.records.lock().get(job_id).cloned()
    }

    /// True while the job is polled by the cycle.
    pub fn is_watching(&self, job_id: &str) -> bool {
        self.watching.lock().contains(job_id)
    }

    /// Requests a soft cancel of `job_id` and starts its cancellation delay.
    ///
    /// Repeated requests keep the first request time. The soft command is delivered
    /// by a spawned task bounded by `cancel_wait`; this call never waits on it.
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// [`TrackerError::UnknownJobReference`] if the job is not tracked.
    pub fn request_cancel(&self, job_id: &str) -> Result<(), TrackerError> {
        let pilot_uid = {
            let mut records = self.records.lock();
            let rec = records
                .get_mut(job_id)
                .ok_or_else(|| TrackerError::UnknownJobReference {
                    job_id: job_id.to_string(),
                })?;
            if rec.cancel_requested_at.is_none() {
                rec.cancel_requested_at = Some(Instant::now());
            }
            rec.pilot_uid.clone()
        };
        self.bus.publish(
            Event::new(EventKind::CancelRequested)
                .with_job(job_id)
                .with_node(pilot_uid.as_str()),
        );

        let msg = ControlMessage::cancel_pilot(self.manager.clone(), pilot_uid.clone());
        let channel = Arc::clone(&self.channel);
        let limit = self.cfg.cancel_wait;
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            let err = match tokio::time::timeout(limit, channel.command(msg)).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {limit:?}"),
            };
            warn!(job = %job_id, pilot = %pilot_uid, error = %err, "soft cancel not delivered; forced cancel still pending");
        });
        Ok(())
    }

    /// Requests cancellation of pilots by pilot uid (or job id). Returns how many were found.
    pub fn cancel_pilots(&self, uids: &[String]) -> usize {
        let mut requested = 0;
        for uid in uids {
            let Some(job_id) = self.resolve(uid) else {
                let err = TrackerError::UnknownJobReference { job_id: uid.clone() };
                warn!(pilot = %uid, label = err.as_label(), "cancel for unknown pilot ignored");
                continue;
            };
            if self.request_cancel(&job_id).is_ok() {
                requested += 1;
            }
        }
        requested
    }

    fn resolve(&self, uid: &str) -> Option<String> {
        let records = self.records.lock();
        if records.contains_key(uid) {
            return Some(uid.to_string());
        }
        records
            .values()
            .find(|r| r.pilot_uid == uid)
            .map(|r| r.job_id.clone())
    }

    /// Subscribes to the control topic; `cancel_pilots` commands addressed to this
    /// manager are turned into [`request_cancel`](Self::request_cancel) calls.
    pub async fn attach(self: &Arc<Self>) -> Result<(), TrackerError> {
        let handler: Arc<dyn ControlHandler> = Arc::new(CancelHandler {
            tracker: Arc::downgrade(self),
        });
        self.channel.subscribe(CONTROL_TOPIC, handler).await?;
        Ok(())
    }

    /// Runs one polling cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let handles: Vec<JobHandle> = {
            let watching = self.watching.lock();
            let records = self.records.lock();
            watching
                .iter()
                .filter_map(|id| records.get(id).map(|r| r.handle.clone()))
                .collect()
        };

        if !handles.is_empty() {
            match self
                .bounded("bulk_state", self.cfg.cancel_wait, self.remote.bulk_state(&handles))
                .await
            {
                Ok(states) => {
                    let (finished, vanished) = self.merge(&handles, &states);
                    for (rec, state) in finished {
                        self.publish(&rec, state).await;
                        report.natural.push((rec.job_id, state));
                    }
                    for rec in vanished {
                        warn!(job = %rec.job_id, pilot = %rec.pilot_uid, misses = rec.misses, "job disappeared from remote state");
                        self.publish(&rec, PilotState::Failed).await;
                        self.bus.publish(
                            Event::new(EventKind::JobMissing)
                                .with_job(rec.job_id.as_str())
                                .with_node(rec.pilot_uid.as_str()),
                        );
                        report.missing.push(rec.job_id);
                    }
                }
                Err(e) => warn!(jobs = handles.len(), error = %e, "bulk state query failed"),
            }
        }

        let overdue = self.claim_overdue(Instant::now());
        if !overdue.is_empty() {
            self.force_cancel(&overdue).await;
            for rec in overdue {
                self.publish(&rec, PilotState::Canceled).await;
                self.bus.publish(
                    Event::new(EventKind::ForcedCancel)
                        .with_job(rec.job_id.as_str())
                        .with_node(rec.pilot_uid.as_str())
                        .with_timeout(self.cfg.cancel_delay),
                );
                report.forced.push(rec.job_id);
            }
        }

        debug!(
            watched = handles.len(),
            natural = report.natural.len(),
            forced = report.forced.len(),
            missing = report.missing.len(),
            "tracker cycle"
        );
        report
    }

    /// Applies a bulk answer; returns finished and vanished records (already removed).
    fn merge(
        &self,
        handles: &[JobHandle],
        states: &HashMap<String, RemoteState>,
    ) -> (Vec<(RemoteJobRecord, PilotState)>, Vec<RemoteJobRecord>) {
        let threshold = self.cfg.miss_threshold();
        let mut finished = Vec::new();
        let mut vanished = Vec::new();

        let mut watching = self.watching.lock();
        let mut records = self.records.lock();
        for handle in handles {
            let id = &handle.id;
            match states.get(id) {
                Some(state) => match state.terminal() {
                    Some(fin) => {
                        watching.remove(id);
                        if let Some(mut rec) = records.remove(id) {
                            rec.state = fin;
                            finished.push((rec, fin));
                        }
                    }
                    None => {
                        if let Some(rec) = records.get_mut(id) {
                            rec.misses = 0;
                        }
                    }
                },
                None => {
                    let gone = match records.get_mut(id) {
                        Some(rec) => {
                            rec.misses += 1;
                            rec.misses >= threshold
                        }
                        None => false,
                    };
                    if gone {
                        watching.remove(id);
                        if let Some(mut rec) = records.remove(id) {
                            rec.state = PilotState::Failed;
                            vanished.push(rec);
                        }
                    }
                }
            }
        }
        (finished, vanished)
    }

    /// Removes and returns every record whose cancellation delay has elapsed.
    fn claim_overdue(&self, now: Instant) -> Vec<RemoteJobRecord> {
        let delay = self.cfg.cancel_delay;
        let mut watching = self.watching.lock();
        let mut records = self.records.lock();
        let ids: Vec<String> = records
            .values()
            .filter(|r| {
                r.cancel_requested_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= delay)
            })
            .map(|r| r.job_id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| {
                watching.remove(id);
                records.remove(id)
            })
            .map(|mut rec| {
                rec.state = PilotState::Canceled;
                rec
            })
            .collect()
    }

    async fn force_cancel(&self, overdue: &[RemoteJobRecord]) {
        let handles: Vec<JobHandle> = overdue.iter().map(|r| r.handle.clone()).collect();
        info!(jobs = handles.len(), delay = ?self.cfg.cancel_delay, "cancellation delay elapsed; forcing remote cancel");

        if let Err(e) = self
            .bounded("cancel", self.cfg.cancel_wait, self.remote.cancel(&handles))
            .await
        {
            warn!(jobs = handles.len(), error = %e, "forced cancel failed");
        }
        let wait = self.cfg.cancel_wait;
        if let Err(e) = self
            .bounded(
                "wait_terminal",
                wait + WAIT_SLACK,
                self.remote.wait_terminal(&handles, wait),
            )
            .await
        {
            warn!(jobs = handles.len(), error = %e, "forced cancel did not settle");
        }
    }

    async fn publish(&self, rec: &RemoteJobRecord, state: PilotState) {
        let sent = self
            .bounded(
                "publish",
                self.cfg.cancel_wait,
                self.channel.publish(EntityType::Pilot, &rec.pilot_uid, state),
            )
            .await;
        if let Err(e) = sent {
            warn!(job = %rec.job_id, pilot = %rec.pilot_uid, %state, error = %e, "state publication failed");
        }
        self.bus.publish(
            Event::new(EventKind::JobStateChanged)
                .with_job(rec.job_id.as_str())
                .with_node(rec.pilot_uid.as_str())
                .with_state(state.as_label()),
        );
    }

    async fn bounded<T, F>(&self, call: &'static str, limit: Duration, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(RemoteError::Call {
                call,
                reason: format!("timed out after {limit:?}"),
            }),
        }
    }
}

/// Control-topic subscriber of one tracker.
struct CancelHandler {
    tracker: Weak<RemoteJobTracker>,
}

#[async_trait]
impl ControlHandler for CancelHandler {
    async fn handle(&self, msg: &ControlMessage) {
        let Some(tracker) = self.tracker.upgrade() else {
            return;
        };
        if msg.cmd != ControlCommand::CancelPilots || msg.manager != tracker.manager {
            debug!(manager = %msg.manager, cmd = ?msg.cmd, "control message ignored");
            return;
        }
        let requested = tracker.cancel_pilots(&msg.uids);
        debug!(requested, total = msg.uids.len(), "cancel command handled");
    }
}

/// Thread node component running the tracker cycle every poll interval.
///
/// Subscribes the tracker to the control topic on initialize.
pub struct TrackerComponent {
    tracker: Arc<RemoteJobTracker>,
}

impl TrackerComponent {
    pub fn new(tracker: Arc<RemoteJobTracker>) -> Self {
        Self { tracker }
    }

    pub fn arc(tracker: Arc<RemoteJobTracker>) -> ComponentRef {
        Arc::new(Self::new(tracker))
    }
}

#[async_trait]
impl Component for TrackerComponent {
    async fn initialize(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        self.tracker
            .attach()
            .await
            .map_err(|e| TaskError::fail(e.to_string()))?;
        info!(node = %ctx.uid(), manager = %self.tracker.manager, "tracker attached");
        Ok(())
    }

    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        ctx.idle(self.tracker.cfg.poll_period()).await;
        if ctx.is_terminating() {
            return Ok(());
        }
        ctx.faults().raise_on(TRACKER_FAULT_TAG)?;
        self.tracker.run_cycle().await;
        Ok(())
    }
}
