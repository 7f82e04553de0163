//! Swarms: map-reduce batch jobs for relay.
//!
//! A swarm turns one trigger message into many agent calls. The pipeline
//! resolves an item list ([`input`]), splits it into batches ([`split`]),
//! runs the batches through a bounded pool with retries ([`pool`]),
//! optionally regroups the outputs by key ([`shuffle`]), reduces them
//! ([`reduce`]), and sends one final response ([`output`]).
//! [`SwarmEngine`] drives the whole thing.

pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod job;
pub mod output;
pub mod pool;
pub mod reduce;
pub mod shuffle;
pub mod split;
pub mod template;

#[cfg(test)]
mod test_support;

pub use config::SwarmLimits;
pub use engine::{JobReport, SwarmEngine};
pub use error::{Result, SwarmError};
pub use input::{resolve_input, InputSource, ResolvedInput};
pub use job::{Batch, BatchStatus, JobState, SwarmJob};
pub use pool::{PoolObserver, RetryPolicy, TaskOutcome, WorkerPool};
pub use reduce::{concatenate, ReduceOutcome};
pub use shuffle::{Partition, ShuffleOutcome, ShufflePlan};
pub use split::split_batches;
