//! # Lamed Feed
//!
//! Adapters that expose a hierarchical data store as a
//! [`MutationFeed`](lamed_core::MutationFeed):
//!
//! ```text
//! RtdbFeed  : Firebase Realtime Database REST API
//!   ├── GET   {url}/{path}.json          → read / get
//!   ├── PATCH {url}/{path}.json          → partial update
//!   └── GET   text/event-stream          → put/patch events → ChildTracker → ChildEvent
//! MemoryFeed: in-process JSON tree with the same event semantics
//! ```

pub mod memory;
pub mod rtdb;
pub mod sse;
pub mod tracker;

pub use memory::MemoryFeed;
pub use rtdb::RtdbFeed;
pub use sse::{SseEvent, SseParser};
pub use tracker::ChildTracker;
