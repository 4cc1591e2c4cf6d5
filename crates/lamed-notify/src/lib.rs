//! # Lamed Notify
//!
//! Event-driven notification dispatch for the telemedicine database.
//!
//! ## Architecture
//! ```text
//! MutationFeed ─┬─> BootstrapGate (one WatchedNode per path)
//!               │      └── ChildRouter: appointment / prescription / lab / chat / payment
//!               │             └── Notice ─> Pipeline ─> TaskPool
//!               │                                         └── Notifier
//!               │                                              ├── RecipientResolver (/users/{id}/{field})
//!               │                                              └── Dispatcher ─> Delivery (HTTP POST)
//!               └─> ReminderScheduler (tokio interval)
//!                      └── per appointment: threshold due? → notify → persist flag
//! ```
//!
//! Failures are contained at the smallest unit of work: one event, one
//! appointment, one dispatch call.

pub mod delivery;
pub mod dispatch;
pub mod gate;
pub mod history;
pub mod notifier;
pub mod pool;
pub mod reminder;
pub mod resolver;
pub mod routers;

pub use delivery::{Delivery, HttpDelivery};
pub use dispatch::{DispatchOutcome, Dispatcher, NotifyStats, StatsSnapshot};
pub use gate::{BootstrapGate, ChildCollection, ChildRouter, NodeStatus, NoticeSink};
pub use history::{NotificationRecord, NotifyHistory};
pub use notifier::{Notifier, Pipeline};
pub use pool::{TaskOutcome, TaskPool, TaskReport};
pub use reminder::{ReminderScheduler, ReminderThreshold, ScanReport};
pub use resolver::RecipientResolver;
