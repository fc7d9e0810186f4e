//! # Subscriber trait
//!
//! A [`Subscribe`] implementation receives runtime events on its own worker task,
//! fed by a bounded queue that the [`SubscriberSet`](crate::subscribers::SubscriberSet)
//! owns. A slow subscriber only delays itself.
//!
//! [`Subscribe::accepts`] is evaluated on the emitting side, before queueing, so
//! a narrow subscriber never fills its queue with events it would ignore.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Name used in overflow and panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity for this subscriber (min 1).
    fn queue_capacity(&self) -> usize {
        1024
    }

    /// Whether events of `kind` are queued for this subscriber at all.
    fn accepts(&self, _kind: EventKind) -> bool {
        true
    }
}
