//! # Lamed Core
//!
//! Shared building blocks for the notification listener:
//! configuration, the error taxonomy, loosely-typed record helpers,
//! and the [`MutationFeed`](feed::MutationFeed) contract every data
//! source adapter implements.

pub mod config;
pub mod error;
pub mod feed;
pub mod record;
pub mod types;

pub use error::{LamedError, Result};
pub use feed::{ChildEvent, ChildEventKind, ChildEventStream, MutationFeed};
pub use types::{Notice, NotificationIntent};
