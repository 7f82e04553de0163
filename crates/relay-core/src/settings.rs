//! The settings document.
//!
//! Settings are a single JSON file. Every section and field has a default
//! so a partial (or empty) document is valid:
//!
//! ```json
//! {
//!   "default_agent": "assistant",
//!   "agents": { "assistant": {}, "coder": { "working_directory": "~/src" } },
//!   "teams": { "dev": { "agents": ["coder", "reviewer"], "leader": "coder" } },
//!   "swarms": { "triage": { "prompt": "Label each issue:\n{{items}}", "batch_size": 25 } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use relay_persistence::atomic::{read_json_optional, write_json_atomic};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Agent used when nothing else routes a message.
    #[serde(default = "default_agent_id")]
    pub default_agent: String,

    #[serde(default)]
    pub agents: BTreeMap<String, AgentSettings>,

    #[serde(default)]
    pub teams: BTreeMap<String, TeamSettings>,

    #[serde(default)]
    pub swarms: BTreeMap<String, SwarmSettings>,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub conversation: ConversationSettings,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_agent: default_agent_id(),
            agents: BTreeMap::new(),
            teams: BTreeMap::new(),
            swarms: BTreeMap::new(),
            queue: QueueSettings::default(),
            dispatch: DispatchSettings::default(),
            conversation: ConversationSettings::default(),
            executor: ExecutorSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Display name; defaults to the agent id.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    /// Per-agent executor command, replacing the global one.
    #[serde(default)]
    pub executor: Option<ExecutorSettings>,
}

impl AgentSettings {
    /// Working directory with `~` expanded.
    pub fn expanded_working_directory(&self) -> Option<String> {
        self.working_directory
            .as_deref()
            .map(|d| shellexpand::tilde(d).into_owned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamSettings {
    #[serde(default)]
    pub name: Option<String>,

    /// Member agent ids.
    pub agents: Vec<String>,

    /// Agent that receives messages addressed to the team.
    pub leader: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Fallback poll interval when no wake-up arrives.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Claims older than this are considered abandoned.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stale_threshold_secs: default_stale_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// Cap on agent messages per conversation.
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,

    /// Conversations older than this are closed with what they have.
    #[serde(default = "default_conversation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            timeout_secs: default_conversation_timeout_secs(),
        }
    }
}

/// How to run an agent turn as a subprocess.
///
/// `{agent}` in `program`, `args` or `reset_args` is replaced with the
/// agent id. The prompt is written to the child's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra arguments appended when the turn must start a fresh context.
    #[serde(default)]
    pub reset_args: Vec<String>,

    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            reset_args: Vec::new(),
            timeout_secs: default_executor_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Responses longer than this are saved to a file.
    #[serde(default = "default_max_inline_chars")]
    pub max_inline_chars: usize,

    /// Characters of a saved response kept inline as a preview.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            max_inline_chars: default_max_inline_chars(),
            preview_chars: default_preview_chars(),
        }
    }
}

/// What to do with a record whose key field is an array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiKeyPolicy {
    /// Place the record in every key's partition.
    #[default]
    Duplicate,
    /// Use only the first key.
    First,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceStrategy {
    /// Join batch outputs under per-batch headers. No agent call.
    #[default]
    Concatenate,
    /// One agent call over every batch output.
    Summarize,
    /// Summarize in groups, repeatedly, until one result remains.
    Hierarchical,
}

impl ReduceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReduceStrategy::Concatenate => "concatenate",
            ReduceStrategy::Summarize => "summarize",
            ReduceStrategy::Hierarchical => "hierarchical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmInputSettings {
    /// Command producing the item list; `{{name}}` placeholders are filled
    /// from the trigger.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_input_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SwarmInputSettings {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_input_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShuffleSettings {
    /// Record field whose value selects the partition.
    pub key_field: String,

    #[serde(default)]
    pub multi_key: MultiKeyPolicy,

    /// Partitions larger than this are split into numbered sub-partitions.
    #[serde(default = "default_max_partition_size")]
    pub max_partition_size: usize,

    /// Prompt for one partition; `{{key}}` and `{{records}}` are filled in.
    #[serde(default = "default_partition_prompt")]
    pub prompt: String,

    /// Prompt for the final merge; `{{results}}` and `{{shared}}` are filled in.
    #[serde(default = "default_merge_prompt")]
    pub merge_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceSettings {
    #[serde(default)]
    pub strategy: ReduceStrategy,

    /// Summarization prompt; `{{results}}` is filled in.
    #[serde(default = "default_reduce_prompt")]
    pub prompt: String,

    /// Group size for hierarchical reduce.
    #[serde(default = "default_fan_in")]
    pub fan_in: usize,

    /// Input size above which `summarize` falls back to hierarchical.
    #[serde(default = "default_max_reduce_chars")]
    pub max_chars: usize,
}

impl Default for ReduceSettings {
    fn default() -> Self {
        Self {
            strategy: ReduceStrategy::default(),
            prompt: default_reduce_prompt(),
            fan_in: default_fan_in(),
            max_chars: default_max_reduce_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSettings {
    #[serde(default)]
    pub name: Option<String>,

    /// Agent id whose executor runs the batches; defaults to the swarm id.
    #[serde(default)]
    pub agent: Option<String>,

    /// Map prompt; `{{items}}`, `{{batch}}`, `{{batches}}` and `{{trigger}}`
    /// are filled in.
    pub prompt: String,

    #[serde(default)]
    pub input: SwarmInputSettings,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Post a progress update every N finished batches; 0 disables.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Extra attempts for a failed batch.
    #[serde(default = "default_batch_retries")]
    pub batch_retries: u32,

    /// Backoff before the first retry; doubles for each further retry.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub shuffle: Option<ShuffleSettings>,

    #[serde(default)]
    pub reduce: ReduceSettings,
}

impl SwarmSettings {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            name: None,
            agent: None,
            prompt: prompt.into(),
            input: SwarmInputSettings::default(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            progress_every: default_progress_every(),
            batch_retries: default_batch_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            shuffle: None,
            reduce: ReduceSettings::default(),
        }
    }
}

impl ShuffleSettings {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            multi_key: MultiKeyPolicy::default(),
            max_partition_size: default_max_partition_size(),
            prompt: default_partition_prompt(),
            merge_prompt: default_merge_prompt(),
        }
    }
}

fn default_agent_id() -> String {
    "default".into()
}
fn default_max_retries() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_stale_threshold_secs() -> u64 {
    600
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_max_messages() -> u32 {
    15
}
fn default_conversation_timeout_secs() -> u64 {
    1800
}
fn default_program() -> String {
    "claude".into()
}
fn default_executor_timeout_secs() -> u64 {
    120
}
fn default_max_inline_chars() -> usize {
    4000
}
fn default_preview_chars() -> usize {
    1500
}
fn default_input_timeout_secs() -> u64 {
    120
}
fn default_max_partition_size() -> usize {
    200
}
fn default_partition_prompt() -> String {
    "Compare the following records that share the key \"{{key}}\". \
     Report findings that involve more than one record, citing record ids.\n\n{{records}}"
        .into()
}
fn default_merge_prompt() -> String {
    "Merge the per-partition findings below into one report. \
     Findings that cite the same record ids describe the same issue: report them once.\n\
     Records present in several partitions: {{shared}}\n\n{{results}}"
        .into()
}
fn default_reduce_prompt() -> String {
    "Combine the following partial results into one concise summary.\n\n{{results}}".into()
}
fn default_fan_in() -> usize {
    20
}
fn default_max_reduce_chars() -> usize {
    600_000
}
fn default_batch_size() -> usize {
    25
}
fn default_concurrency() -> usize {
    5
}
fn default_progress_every() -> usize {
    10
}
fn default_batch_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    2000
}

impl Settings {
    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Settings = read_json_optional(path)?.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }

    /// Checks cross-references between sections.
    pub fn validate(&self) -> Result<()> {
        let dispatch = &self.dispatch;
        for (name, value) in [
            ("poll_interval_ms", dispatch.poll_interval_ms),
            ("stale_threshold_secs", dispatch.stale_threshold_secs),
            ("sweep_interval_secs", dispatch.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("dispatch.{} must be greater than 0", name)));
            }
        }

        for (id, team) in &self.teams {
            if team.agents.is_empty() {
                return Err(ConfigError::Invalid(format!("team '{}' has no agents", id)));
            }
            if !team.agents.iter().any(|a| a.eq_ignore_ascii_case(&team.leader)) {
                return Err(ConfigError::Invalid(format!(
                    "team '{}' leader '{}' is not a member",
                    id, team.leader
                )));
            }
            if let Some(unknown) = team.agents.iter().find(|a| !self.has_agent(a)) {
                return Err(ConfigError::Invalid(format!(
                    "team '{}' references unknown agent '{}'",
                    id, unknown
                )));
            }
        }

        for (id, swarm) in &self.swarms {
            if swarm.batch_size == 0 {
                return Err(ConfigError::Invalid(format!("swarm '{}' has batch_size 0", id)));
            }
            if let Some(shuffle) = &swarm.shuffle {
                if shuffle.key_field.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "swarm '{}' shuffle has an empty key_field",
                        id
                    )));
                }
            }
        }

        let clash = self
            .swarms
            .keys()
            .find(|s| self.has_agent(s) || self.teams.keys().any(|t| t.eq_ignore_ascii_case(s)));
        if let Some(id) = clash {
            return Err(ConfigError::Invalid(format!(
                "swarm id '{}' is also used by an agent or team",
                id
            )));
        }

        Ok(())
    }

    fn has_agent(&self, id: &str) -> bool {
        self.agents.keys().any(|a| a.eq_ignore_ascii_case(id))
    }
}
