//! Relay command-line interface.
//!
//! - `relay run`: start the dispatcher until Ctrl-C
//! - `relay send <msg>`: enqueue a message
//! - `relay dead`: list dead-lettered work
//! - `relay outbox <channel>`: print and acknowledge pending responses
//! - `relay status`, `relay events`: inspect the queue and event journal

pub mod cli;
pub mod commands;
