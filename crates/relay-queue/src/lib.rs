//! Transactional work and response queue for relay.
//!
//! [`QueueStore`] holds two record kinds:
//! - work items (`pending → processing → completed | dead`)
//! - response items (`pending → delivering → acked`)
//!
//! Every transition happens under one mutex and is written through to a
//! [`RecordStore`](relay_persistence::RecordStore) when the queue is
//! persistent, so a restarted process sees the same records. Claims are
//! exclusive: when several callers race for the same record exactly one
//! gets it and the others see "nothing claimed".
//!
//! # Example
//!
//! ```no_run
//! use relay_queue::{QueueConfig, QueueStore};
//! use relay_persistence::RecordStore;
//! use relay_models::WorkItem;
//!
//! let queue = QueueStore::open(RecordStore::new("/tmp/relay/queue"), QueueConfig::default()).unwrap();
//! queue.enqueue(WorkItem::new("manual", "cli", "@coder hello")).unwrap();
//!
//! if let Some(item) = queue.claim("dispatcher").unwrap() {
//!     queue.complete(&item.id).unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod store;

pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use filter::WorkFilter;
pub use store::{QueueCounts, QueueStore, StaleSweep};
