//! # Pilot launcher.
//!
//! Launches batches of pilots: every pilot of a batch is published
//! `PMGR_LAUNCHING`, then pilots are bucketed by `(resource, access schema)`.
//! Each bucket's launch parameters are validated before any remote call; a bucket
//! that fails validation is published `FAILED` as a whole. Submitted pilots are
//! handed to the [`RemoteJobTracker`] and published `PMGR_ACTIVE_PENDING`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::config::ResourceRegistry;
use crate::error::{TaskError, TrackerError};
use crate::node::{Component, ComponentRef, NodeContext};
use crate::remote::collaborator::ControlChannel;
use crate::remote::tracker::RemoteJobTracker;
use crate::remote::types::{EntityType, JobHandle, PilotDescription, PilotState};

/// Environment variable carrying the pilot uid into the agent job.
pub const PILOT_UID_ENV: &str = "PILOT_UID";

/// Outcome of one [`PilotLauncher::launch`] batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    /// Submitted pilots and their job handles.
    pub launched: Vec<(String, JobHandle)>,
    /// Pilots published `FAILED`, with the reason.
    pub failed: Vec<(String, String)>,
}

pub struct PilotLauncher {
    resources: ResourceRegistry,
    tracker: Arc<RemoteJobTracker>,
    channel: Arc<dyn ControlChannel>,
}

impl PilotLauncher {
    pub fn new(
        resources: ResourceRegistry,
        tracker: Arc<RemoteJobTracker>,
        channel: Arc<dyn ControlChannel>,
    ) -> Self {
        Self {
            resources,
            tracker,
            channel,
        }
    }

    pub fn tracker(&self) -> &Arc<RemoteJobTracker> {
        &self.tracker
    }

    /// Launches a batch. Failures are published and reported, never raised.
    pub async fn launch(&self, pilots: Vec<PilotDescription>) -> LaunchReport {
        let mut report = LaunchReport::default();
        for pilot in &pilots {
            self.publish(&pilot.uid, PilotState::PmgrLaunching).await;
        }

        let mut buckets: BTreeMap<(String, Option<String>), Vec<PilotDescription>> = BTreeMap::new();
        for pilot in pilots {
            buckets
                .entry((pilot.resource.clone(), pilot.access_schema.clone()))
                .or_default()
                .push(pilot);
        }

        for ((resource, schema), bucket) in buckets {
            let params = match self.resources.resolve(&resource, schema.as_deref()) {
                Ok(params) => params,
                Err(e) => {
                    let err = TrackerError::from(e);
                    warn!(resource = %resource, pilots = bucket.len(), label = err.as_label(), error = %err, "bucket launch failed");
                    for pilot in bucket {
                        self.publish(&pilot.uid, PilotState::Failed).await;
                        report.failed.push((pilot.uid, err.to_string()));
                    }
                    continue;
                }
            };
            info!(resource = %resource, schema = %params.schema, pilots = bucket.len(), "launching bucket");

            for pilot in bucket {
                let mut job = pilot.job.clone();
                job.endpoint = Some(params.endpoint.clone());
                job.environment
                    .entry(PILOT_UID_ENV.to_string())
                    .or_insert_with(|| pilot.uid.clone());

                match self.tracker.submit(pilot.uid.as_str(), &job).await {
                    Ok(handle) => {
                        self.publish(&pilot.uid, PilotState::PmgrActivePending).await;
                        report.launched.push((pilot.uid, handle));
                    }
                    Err(e) => {
                        warn!(pilot = %pilot.uid, label = e.as_label(), error = %e, "pilot submission failed");
                        self.publish(&pilot.uid, PilotState::Failed).await;
                        report.failed.push((pilot.uid, e.to_string()));
                    }
                }
            }
        }
        report
    }

    async fn publish(&self, uid: &str, state: PilotState) {
        let limit = self.tracker.config().cancel_wait;
        let sent = tokio::time::timeout(limit, self.channel.publish(EntityType::Pilot, uid, state)).await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(pilot = uid, %state, error = %e, "state publication failed"),
            Err(_) => warn!(pilot = uid, %state, "state publication timed out"),
        }
    }
}

/// Thread node component feeding queued batches to a [`PilotLauncher`].
pub struct LauncherComponent {
    launcher: Arc<PilotLauncher>,
    queue: Mutex<mpsc::Receiver<Vec<PilotDescription>>>,
}

impl LauncherComponent {
    /// Returns the batch sender and the component reading from it.
    pub fn channel(
        launcher: Arc<PilotLauncher>,
        capacity: usize,
    ) -> (mpsc::Sender<Vec<PilotDescription>>, ComponentRef) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let component = Arc::new(Self {
            launcher,
            queue: Mutex::new(rx),
        });
        (tx, component)
    }
}

#[async_trait]
impl Component for LauncherComponent {
    async fn work(&self, ctx: &NodeContext) -> Result<(), TaskError> {
        let mut queue = self.queue.lock().await;
        tokio::select! {
            batch = queue.recv() => match batch {
                Some(batch) => {
                    let report = self.launcher.launch(batch).await;
                    info!(
                        node = %ctx.uid(),
                        launched = report.launched.len(),
                        failed = report.failed.len(),
                        "batch launched"
                    );
                }
                // All senders gone: nothing more to launch.
                None => ctx.interrupted().await,
            },
            _ = ctx.interrupted() => {}
        }
        Ok(())
    }
}
