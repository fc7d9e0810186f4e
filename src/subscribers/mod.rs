//! # Event subscribers for the pilotvisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out,
//! and built-in subscribers for events broadcast through the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Node driver / Watcher / Escalation / Tracker
//!        └── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//!                                                                  │
//!                                              ┌───────────────────┼──────────┐
//!                                              ▼                   ▼          ▼
//!                                          LogWriter           Counters    Custom
//!                                          (tracing)           (metrics)
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use pilotvisor::{Subscribe, Event, EventKind};
//! use async_trait::async_trait;
//!
//! struct LeakAlarm;
//!
//! #[async_trait]
//! impl Subscribe for LeakAlarm {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::ChildLeaked {
//!             // page someone
//!         }
//!     }
//! }
//! ```

mod counters;
mod log;
mod set;
mod subscribe;

pub use counters::{Counters, CountersSnapshot};
pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
