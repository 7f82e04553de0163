//! Lifecycle events for relay.
//!
//! Components report what happened (an item was routed, a conversation
//! handed off, a swarm batch finished) through an [`EventBus`]. Emitting
//! never blocks and never fails: a full subscriber buffer or an unwritable
//! journal only drops the event for that sink.

pub mod bus;
pub mod error;
pub mod event;
pub mod filter;

pub use bus::{EventBus, JournalHandle, DEFAULT_HISTORY};
pub use error::{EventError, Result};
pub use event::{Envelope, LifecycleEvent};
pub use filter::EventFilter;
