//! Subprocess-backed executor.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{ExecutorSettings, Settings};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ExecutorError, Result};
use crate::executor::AgentExecutor;

const AGENT_PLACEHOLDER: &str = "{agent}";
const STDERR_LIMIT: usize = 2000;

#[derive(Debug, Clone)]
struct AgentCommand {
    settings: ExecutorSettings,
    working_directory: Option<String>,
}

/// Runs each turn as a child process.
///
/// The prompt goes to the child's stdin and its stdout is the reply. A
/// child that outlives the timeout is killed.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    fallback: AgentCommand,
    agents: HashMap<String, AgentCommand>,
}

impl CommandExecutor {
    /// One command for every agent.
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            fallback: AgentCommand {
                settings,
                working_directory: None,
            },
            agents: HashMap::new(),
        }
    }

    /// Uses the global executor settings plus each agent's overrides.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut executor = Self::new(settings.executor.clone());
        for (id, agent) in &settings.agents {
            let command = AgentCommand {
                settings: agent
                    .executor
                    .clone()
                    .unwrap_or_else(|| settings.executor.clone()),
                working_directory: agent.expanded_working_directory(),
            };
            executor.agents.insert(id.to_lowercase(), command);
        }
        executor
    }

    fn command_for(&self, agent: &str) -> &AgentCommand {
        self.agents
            .get(&agent.to_lowercase())
            .unwrap_or(&self.fallback)
    }

    fn build(&self, agent: &str, reset_context: bool) -> (Command, &AgentCommand) {
        let entry = self.command_for(agent);
        let fill = |s: &String| s.replace(AGENT_PLACEHOLDER, agent);

        let mut cmd = Command::new(fill(&entry.settings.program));
        cmd.args(entry.settings.args.iter().map(fill));
        if reset_context {
            cmd.args(entry.settings.reset_args.iter().map(fill));
        }
        if let Some(dir) = &entry.working_directory {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        (cmd, entry)
    }
}

#[async_trait]
impl AgentExecutor for CommandExecutor {
    async fn invoke(&self, prompt: &str, agent: &str, reset_context: bool) -> Result<String> {
        let (mut cmd, entry) = self.build(agent, reset_context);
        let timeout = Duration::from_secs(entry.settings.timeout_secs);
        debug!(agent, reset_context, program = %entry.settings.program, "invoking agent");

        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: entry.settings.program.clone(),
            source,
        })?;

        // The prompt is written while the child runs, so a child that never
        // reads stdin still hits the timeout instead of blocking the write.
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(prompt.as_bytes()).await,
                None => Ok(()),
            }
        };
        let turn = async move { tokio::join!(feed, child.wait_with_output()) };

        let (written, output) = match tokio::time::timeout(timeout, turn).await {
            Ok((written, result)) => {
                let output = result.map_err(|source| ExecutorError::Io {
                    agent: agent.to_string(),
                    source,
                })?;
                (written, output)
            }
            Err(_) => {
                warn!(agent, ?timeout, "agent turn timed out");
                return Err(ExecutorError::Timeout {
                    agent: agent.to_string(),
                    after: timeout,
                });
            }
        };

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.len() > STDERR_LIMIT {
                let cut = (0..=STDERR_LIMIT)
                    .rev()
                    .find(|i| stderr.is_char_boundary(*i))
                    .unwrap_or(0);
                stderr.truncate(cut);
            }
            return Err(ExecutorError::NonZeroExit {
                agent: agent.to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if let Err(source) = written {
            // A child may answer without reading its whole prompt; only an
            // empty reply makes the lost prompt an error.
            if reply.is_empty() {
                return Err(ExecutorError::Io {
                    agent: agent.to_string(),
                    source,
                });
            }
            debug!(agent, error = %source, "agent closed stdin before reading the whole prompt");
        }
        Ok(reply)
    }
}
