//! Collaborator seams: remote execution and the control channel.
//!
//! Both are external services. Implementations must be safe to call
//! concurrently; the tracker never holds a lock across these calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::remote::types::{ControlMessage, EntityType, JobDescription, JobHandle, PilotState, RemoteState};

/// Remote job submission and control.
#[async_trait]
pub trait RemoteExecution: Send + Sync + 'static {
    /// Submits one job and returns its remote handle.
    async fn submit(&self, job: &JobDescription) -> Result<JobHandle, RemoteError>;

    /// Queries the state of many jobs in one round trip.
    ///
    /// Jobs the service no longer knows are simply absent from the answer.
    async fn bulk_state(
        &self,
        jobs: &[JobHandle],
    ) -> Result<HashMap<String, RemoteState>, RemoteError>;

    /// Requests cancellation of the given jobs.
    async fn cancel(&self, jobs: &[JobHandle]) -> Result<(), RemoteError>;

    /// Waits until every job is terminal or `timeout` elapses.
    async fn wait_terminal(&self, jobs: &[JobHandle], timeout: Duration) -> Result<(), RemoteError>;
}

/// Receives control messages for one subscribed topic.
#[async_trait]
pub trait ControlHandler: Send + Sync + 'static {
    async fn handle(&self, msg: &ControlMessage);
}

/// State publication and command transport.
///
/// Delivery is at-least-once: consumers must tolerate duplicates.
#[async_trait]
pub trait ControlChannel: Send + Sync + 'static {
    /// Publishes a state change of an entity.
    async fn publish(&self, entity: EntityType, uid: &str, state: PilotState) -> Result<(), RemoteError>;

    /// Sends a command on its topic.
    async fn command(&self, msg: ControlMessage) -> Result<(), RemoteError>;

    /// Registers a handler for a topic.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn ControlHandler>) -> Result<(), RemoteError>;
}
