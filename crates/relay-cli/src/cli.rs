//! Command-line interface definition using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Version with git hash and build date, e.g. "0.3.0 (abc1234, 2026-10-16)".
fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const BUILD_DATE: &str = env!("BUILD_DATE");

    static VERSION_STRING: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION_STRING.get_or_init(|| format!("{} ({}, {})", VERSION, GIT_HASH, BUILD_DATE))
}

/// Relay - queue-backed multi-agent message router
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version = version_string(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to state directory
    #[arg(short, long, env = "RELAY_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dispatcher until Ctrl-C
    Run,

    /// Enqueue a message
    Send {
        /// Message text; may start with @agent, @team or @swarm
        #[arg(required = true)]
        message: Vec<String>,

        /// Channel tag responses are delivered to
        #[arg(short, long, default_value = "cli")]
        channel: String,

        /// Sender name
        #[arg(long, default_value = "user")]
        sender: String,

        /// Explicit target agent, team or swarm
        #[arg(short, long)]
        target: Option<String>,

        /// Attach a file
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },

    /// List dead-lettered work items
    Dead,

    /// Print pending responses for a channel
    Outbox {
        channel: String,

        /// Leave responses pending instead of acknowledging them
        #[arg(long)]
        peek: bool,
    },

    /// Show queue counts
    Status,

    /// Print recorded lifecycle events
    Events {
        /// Only events for this conversation id
        #[arg(long)]
        conversation: Option<String>,

        /// Only events for this swarm job id
        #[arg(long)]
        job: Option<String>,

        /// Only events of this kind (e.g. job_done)
        #[arg(long)]
        name: Option<String>,

        /// Show at most this many of the latest events
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

impl Cli {
    /// State directory from the flag or environment, else the default.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(relay_core::config::state_dir)
    }
}
