//! Filesystem layout for relay.
//!
//! ```text
//! ~/.relay/
//! ├── settings.json   # agents, teams, swarms, tuning
//! ├── .env.local      # secrets for executor commands
//! ├── queue/          # work and response records
//! ├── files/          # long outputs and swarm reports
//! └── logs/
//!     └── events.jsonl
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_STATE_DIR`: override the base directory
//! - `RELAY_SETTINGS`: override the settings file path

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const STATE_DIR_ENV: &str = "RELAY_STATE_DIR";
pub const SETTINGS_ENV: &str = "RELAY_SETTINGS";

const DEFAULT_STATE_DIR: &str = ".relay";

static STATE_DIR_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Base state directory.
///
/// 1. `RELAY_STATE_DIR` if set
/// 2. `~/.relay` if a home directory is known
/// 3. `.relay` in the current directory
pub fn state_dir() -> PathBuf {
    STATE_DIR_CACHE
        .get_or_init(|| {
            std::env::var(STATE_DIR_ENV)
                .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()))
                .unwrap_or_else(|_| {
                    dirs::home_dir()
                        .map(|h| h.join(DEFAULT_STATE_DIR))
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
                })
        })
        .clone()
}

/// Paths under one state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout under [`state_dir`].
    pub fn from_env() -> Self {
        Self::new(state_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn events_file(&self) -> PathBuf {
        self.logs_dir().join("events.jsonl")
    }

    /// `RELAY_SETTINGS` if set, else `settings.json` in the state dir.
    pub fn settings_file(&self) -> PathBuf {
        std::env::var(SETTINGS_ENV)
            .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()))
            .unwrap_or_else(|_| self.root.join("settings.json"))
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join(".env.local")
    }

    /// Creates every directory relay writes to.
    pub fn ensure_all_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.queue_dir())?;
        std::fs::create_dir_all(self.files_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

/// Loads `.env.local` from the default state dir, then `.env` from the
/// working directory. Existing variables are never overridden.
pub fn load_env() {
    let env_path = StatePaths::from_env().env_file();
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    let _ = dotenvy::dotenv();
}
