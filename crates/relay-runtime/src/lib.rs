//! Dispatch runtime for relay.
//!
//! The runtime claims pending work items from the queue, routes each one to
//! a sequential lane (one per agent, one per swarm), and runs it: an
//! ordinary agent turn, a teammate turn inside a team conversation, or a
//! swarm job. A sweeper task returns stale claims to pending and closes
//! conversations that outlived their timeout.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_runtime::{Runtime, RuntimeConfig};
//!
//! let mut runtime = Runtime::new(RuntimeConfig::from(&settings), queue, executor, roster, events);
//! runtime.start().await?;
//! tokio::signal::ctrl_c().await?;
//! runtime.shutdown().await?;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lane;
pub mod routing;
pub mod runtime;
pub mod sweeper;
pub mod turn;

pub use config::RuntimeConfig;
pub use dispatcher::Dispatcher;
pub use error::{Result, RuntimeError};
pub use lane::{LaneHandler, LaneJob, Lanes};
pub use routing::{leading_mention, LaneKey, Route, Router};
pub use runtime::Runtime;
pub use sweeper::{SweepReport, Sweeper};
pub use turn::{pending_indicator, TurnProcessor, APOLOGY};
