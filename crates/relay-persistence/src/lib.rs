//! Persistence layer for relay.
//!
//! Everything is stored as plain JSON files written atomically (temp file
//! in the same directory, then rename), so a crash never leaves a half
//! written record behind.
//!
//! # Example
//!
//! ```no_run
//! use relay_persistence::RecordStore;
//! use relay_models::WorkItem;
//!
//! let store = RecordStore::new("/home/user/.relay/queue");
//! let item = WorkItem::new("manual", "cli", "@coder run the tests");
//! store.save_work(&item).unwrap();
//!
//! let all = store.list_work().unwrap();
//! assert_eq!(all.len(), 1);
//! ```

pub mod artifacts;
pub mod atomic;
pub mod error;
pub mod record_store;

pub use artifacts::ArtifactStore;
pub use error::{PersistenceError, Result};
pub use record_store::RecordStore;
