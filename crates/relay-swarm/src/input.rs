//! Input resolution: turning a trigger into an ordered item list.
//!
//! Sources are tried in order and the first one that yields items wins:
//!
//! 1. a JSON array in the trigger text (bare or in a fenced block)
//! 2. a file attached to the trigger
//! 3. the swarm's configured command, with `{{param}}` filled from the trigger
//! 4. a command in the trigger itself (`run: ...` or a fenced `sh` block)
//! 5. one item per non-empty line of the trigger

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use relay_core::SwarmInputSettings;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, SwarmError};
use crate::template::fill_strict;

const STDERR_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Inline,
    File(String),
    Command,
    AdHocCommand,
    Lines,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Inline => write!(f, "inline list"),
            InputSource::File(path) => write!(f, "file {}", path),
            InputSource::Command => write!(f, "configured command"),
            InputSource::AdHocCommand => write!(f, "command in message"),
            InputSource::Lines => write!(f, "message lines"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub items: Vec<String>,
    pub source: InputSource,
}

fn fenced_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z]*)[ \t]*\n(.*?)```").expect("valid fence regex"))
}

fn kv_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:^|\s)([A-Za-z_][A-Za-z0-9_]*)=("[^"]*"|\S+)"#).expect("valid param regex")
    })
}

fn repo_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)([A-Za-z0-9][A-Za-z0-9_.-]*)/([A-Za-z0-9][A-Za-z0-9_.-]*)(?:\s|$)")
            .expect("valid repo regex")
    })
}

/// Resolves the item list for one trigger.
pub async fn resolve_input(
    trigger: &str,
    files: &[String],
    settings: &SwarmInputSettings,
) -> Result<ResolvedInput> {
    if let Some(items) = inline_list(trigger) {
        return Ok(resolved(items, InputSource::Inline));
    }

    for path in files {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SwarmError::InputFile {
                path: path.clone(),
                source,
            })?;
        let items = parse_items(&contents);
        if !items.is_empty() {
            return Ok(resolved(items, InputSource::File(path.clone())));
        }
        debug!(path = %path, "attached file has no items");
    }

    let timeout = Duration::from_secs(settings.timeout_secs);
    if let Some(template) = &settings.command {
        let command = fill_strict(template, &extract_params(trigger))?;
        let items = parse_items(&run_command(&command, timeout).await?);
        if items.is_empty() {
            return Err(SwarmError::NoInput(format!("command produced no items: {}", command)));
        }
        return Ok(resolved(items, InputSource::Command));
    }

    if let Some(command) = adhoc_command(trigger) {
        let items = parse_items(&run_command(&command, timeout).await?);
        if items.is_empty() {
            return Err(SwarmError::NoInput(format!("command produced no items: {}", command)));
        }
        return Ok(resolved(items, InputSource::AdHocCommand));
    }

    let items: Vec<String> = non_empty_lines(trigger);
    if items.is_empty() {
        return Err(SwarmError::NoInput("trigger message is empty".into()));
    }
    Ok(resolved(items, InputSource::Lines))
}

fn resolved(items: Vec<String>, source: InputSource) -> ResolvedInput {
    info!(count = items.len(), %source, "resolved swarm input");
    ResolvedInput { items, source }
}

/// Splits command or file output into items: a JSON array if the text is
/// one, otherwise its non-empty lines.
pub fn parse_items(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<Value>>(trimmed) {
            return values.into_iter().map(value_to_item).collect();
        }
    }
    non_empty_lines(trimmed)
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn value_to_item(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn parse_array(text: &str) -> Option<Vec<String>> {
    let values: Vec<Value> = serde_json::from_str(text.trim()).ok()?;
    if values.is_empty() {
        return None;
    }
    Some(values.into_iter().map(value_to_item).collect())
}

/// A non-empty JSON array embedded in the trigger.
fn inline_list(trigger: &str) -> Option<Vec<String>> {
    for caps in fenced_pattern().captures_iter(trigger) {
        let lang = caps[1].to_ascii_lowercase();
        if lang.is_empty() || lang == "json" {
            if let Some(items) = parse_array(&caps[2]) {
                return Some(items);
            }
        }
    }
    let outside = fenced_pattern().replace_all(trigger, "");
    let start = outside.find('[')?;
    let end = outside.rfind(']')?;
    if end <= start {
        return None;
    }
    parse_array(&outside[start..=end])
}

/// A command written into the trigger: a fenced `sh`/`bash` block or a
/// `run: ...` line.
fn adhoc_command(trigger: &str) -> Option<String> {
    for caps in fenced_pattern().captures_iter(trigger) {
        if matches!(caps[1].to_ascii_lowercase().as_str(), "sh" | "bash" | "shell") {
            let body = caps[2].trim();
            if !body.is_empty() {
                return Some(body.to_string());
            }
        }
    }
    trigger
        .lines()
        .filter_map(|l| l.trim().strip_prefix("run:"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// Parameters for `{{name}}` placeholders: `key=value` pairs, plus `repo`,
/// `owner` and `name` from the first `owner/name` token.
pub fn extract_params(trigger: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(caps) = repo_pattern().captures(trigger) {
        params.insert("repo".to_string(), format!("{}/{}", &caps[1], &caps[2]));
        params.insert("owner".to_string(), caps[1].to_string());
        params.insert("name".to_string(), caps[2].to_string());
    }
    for caps in kv_pattern().captures_iter(trigger) {
        let value = caps[2].trim_matches('"').to_string();
        params.insert(caps[1].to_string(), value);
    }
    params
}

/// Runs `command` with `sh -c` and returns its stdout.
pub async fn run_command(command: &str, timeout: Duration) -> Result<String> {
    debug!(command, ?timeout, "running input command");
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SwarmError::InputCommand {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| SwarmError::InputCommand {
            command: command.to_string(),
            reason: e.to_string(),
        })?,
        Err(_) => {
            warn!(command, ?timeout, "input command timed out");
            return Err(SwarmError::InputTimeout {
                command: command.to_string(),
                after: timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .trim()
            .chars()
            .take(STDERR_LIMIT)
            .collect();
        let reason = match output.status.code() {
            Some(code) if stderr.is_empty() => format!("exit code {}", code),
            Some(code) => format!("exit code {}: {}", code, stderr),
            None => format!("terminated by signal: {}", stderr),
        };
        return Err(SwarmError::InputCommand {
            command: command.to_string(),
            reason,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
