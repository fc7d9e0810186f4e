//! In-process control channel.
//!
//! Records every publication and command, and delivers commands to the handlers
//! subscribed to the command's topic. Handlers are called outside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::RemoteError;
use crate::remote::collaborator::{ControlChannel, ControlHandler};
use crate::remote::types::{ControlMessage, EntityType, PilotState};

/// One recorded state publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub entity: EntityType,
    pub uid: String,
    pub state: PilotState,
}

#[derive(Default)]
pub struct LocalChannel {
    publications: Mutex<Vec<Publication>>,
    commands: Mutex<Vec<ControlMessage>>,
    handlers: Mutex<HashMap<String, Vec<Arc<dyn ControlHandler>>>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publication so far, in order.
    pub fn publications(&self) -> Vec<Publication> {
        self.publications.lock().clone()
    }

    /// Every command sent so far, in order.
    pub fn commands(&self) -> Vec<ControlMessage> {
        self.commands.lock().clone()
    }

    /// States published for one uid, in order.
    pub fn states_of(&self, uid: &str) -> Vec<PilotState> {
        self.publications
            .lock()
            .iter()
            .filter(|p| p.uid == uid)
            .map(|p| p.state)
            .collect()
    }

    /// Forgets recorded publications and commands; subscriptions stay.
    pub fn clear(&self) {
        self.publications.lock().clear();
        self.commands.lock().clear();
    }
}

#[async_trait]
impl ControlChannel for LocalChannel {
    async fn publish(&self, entity: EntityType, uid: &str, state: PilotState) -> Result<(), RemoteError> {
        self.publications.lock().push(Publication {
            entity,
            uid: uid.to_string(),
            state,
        });
        Ok(())
    }

    async fn command(&self, msg: ControlMessage) -> Result<(), RemoteError> {
        self.commands.lock().push(msg.clone());
        let handlers = self
            .handlers
            .lock()
            .get(msg.topic())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler.handle(&msg).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn ControlHandler>) -> Result<(), RemoteError> {
        self.handlers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}
