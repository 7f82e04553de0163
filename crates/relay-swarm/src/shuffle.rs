//! Shuffle: regroup map outputs by a record key so related records from
//! different batches are compared in the same agent call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use relay_core::{MultiKeyPolicy, ShuffleSettings};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::pool::{PoolObserver, WorkerPool};
use crate::template::fill;

fn fenced_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n(.*?)```").expect("valid fence regex"))
}

/// Records parsed from one batch output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecords {
    pub records: Vec<Value>,
    /// Entries that looked like records but could not be used.
    pub skipped: usize,
}

/// A record with a stable id for cross-partition references.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecord {
    pub id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: String,
    /// `(part, parts)` when an oversize partition was sub-split.
    pub part: Option<(usize, usize)>,
    pub records: Vec<KeyedRecord>,
    pub result: Option<String>,
}

impl Partition {
    pub fn label(&self) -> String {
        match self.part {
            Some((part, parts)) => format!("{} (part {}/{})", self.key, part, parts),
            None => self.key.clone(),
        }
    }
}

/// Partitions built from every batch output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShufflePlan {
    pub partitions: Vec<Partition>,
    pub records: usize,
    pub skipped: usize,
}

fn objects(values: Vec<Value>) -> ParsedRecords {
    let mut parsed = ParsedRecords::default();
    for value in values {
        if value.is_object() {
            parsed.records.push(value);
        } else {
            parsed.skipped += 1;
        }
    }
    parsed
}

/// Parses a batch output as records: a bare JSON array, an array in a
/// fenced block, or one JSON object per line.
pub fn parse_records(output: &str) -> ParsedRecords {
    let trimmed = output.trim();
    if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(trimmed) {
        return objects(values);
    }
    for caps in fenced_pattern().captures_iter(output) {
        if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(caps[1].trim()) {
            return objects(values);
        }
    }

    let mut parsed = ParsedRecords::default();
    for line in trimmed.lines().map(str::trim) {
        if !line.starts_with('{') {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) if value.is_object() => parsed.records.push(value),
            _ => {
                debug!(line, "skipping malformed record");
                parsed.skipped += 1;
            }
        }
    }
    parsed
}

fn key_string(value: &Value) -> Option<String> {
    let key = match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!key.is_empty()).then_some(key)
}

/// Partition keys of `record`. Array-valued keys follow `policy`.
pub fn record_keys(record: &Value, key_field: &str, policy: MultiKeyPolicy) -> Option<Vec<String>> {
    let mut keys: Vec<String> = match record.get(key_field)? {
        Value::Array(values) => {
            let mut keys: Vec<String> = Vec::new();
            for key in values.iter().filter_map(key_string) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            keys
        }
        other => vec![key_string(other)?],
    };
    if keys.is_empty() {
        return None;
    }
    if policy == MultiKeyPolicy::First {
        keys.truncate(1);
    }
    Some(keys)
}

/// The record's own `id` field, or a position-derived one.
pub fn record_id(record: &Value, batch: usize, position: usize) -> String {
    match record.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("r{}-{}", batch + 1, position + 1),
    }
}

/// Groups the records in `outputs` (batch index, batch output) by key.
pub fn plan_partitions(outputs: &[(usize, &str)], settings: &ShuffleSettings) -> ShufflePlan {
    let mut groups: BTreeMap<String, Vec<KeyedRecord>> = BTreeMap::new();
    let mut plan = ShufflePlan::default();

    for (batch, output) in outputs {
        let parsed = parse_records(output);
        plan.skipped += parsed.skipped;
        for (position, record) in parsed.records.into_iter().enumerate() {
            let Some(keys) = record_keys(&record, &settings.key_field, settings.multi_key) else {
                debug!(batch, position, key_field = %settings.key_field, "record has no usable key");
                plan.skipped += 1;
                continue;
            };
            plan.records += 1;
            let id = record_id(&record, *batch, position);
            for key in keys {
                groups.entry(key).or_default().push(KeyedRecord {
                    id: id.clone(),
                    value: record.clone(),
                });
            }
        }
    }

    let max = settings.max_partition_size.max(1);
    for (key, records) in groups {
        if records.len() <= max {
            plan.partitions.push(Partition {
                key,
                part: None,
                records,
                result: None,
            });
            continue;
        }
        let parts = records.len().div_ceil(max);
        for (i, chunk) in records.chunks(max).enumerate() {
            plan.partitions.push(Partition {
                key: key.clone(),
                part: Some((i + 1, parts)),
                records: chunk.to_vec(),
                result: None,
            });
        }
    }
    plan
}

/// Ids of records placed under more than one key.
pub fn shared_record_ids(partitions: &[Partition]) -> Vec<String> {
    let mut keys_by_id: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for partition in partitions {
        for record in &partition.records {
            keys_by_id
                .entry(record.id.as_str())
                .or_default()
                .insert(partition.key.as_str());
        }
    }
    keys_by_id
        .into_iter()
        .filter(|(_, keys)| keys.len() > 1)
        .map(|(id, _)| id.to_string())
        .collect()
}

pub fn partition_prompt(settings: &ShuffleSettings, partition: &Partition) -> String {
    let records = partition
        .records
        .iter()
        .map(|r| format!("[{}] {}", r.id, r.value))
        .collect::<Vec<_>>()
        .join("\n");
    fill(&settings.prompt, &[("key", &partition.label()), ("records", &records)])
}

pub fn merge_prompt(settings: &ShuffleSettings, partitions: &[Partition], shared: &[String]) -> String {
    let shared = if shared.is_empty() {
        "(none)".to_string()
    } else {
        shared.join(", ")
    };
    fill(
        &settings.merge_prompt,
        &[("results", &partition_results(partitions)), ("shared", &shared)],
    )
}

fn partition_results(partitions: &[Partition]) -> String {
    partitions
        .iter()
        .filter_map(|p| p.result.as_ref().map(|r| format!("### {}\n{}", p.label(), r)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// What the shuffle stage produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ShuffleOutcome {
    pub text: String,
    pub partitions: usize,
    pub failed_partitions: usize,
    pub skipped_records: usize,
}

/// Reduces every partition (bounded by the pool) and merges the results.
pub async fn run_shuffle(
    pool: &WorkerPool,
    settings: &ShuffleSettings,
    outputs: &[(usize, &str)],
    observer: &dyn PoolObserver,
) -> ShuffleOutcome {
    let mut plan = plan_partitions(outputs, settings);
    info!(
        partitions = plan.partitions.len(),
        records = plan.records,
        skipped = plan.skipped,
        "shuffled batch outputs"
    );

    let prompts = plan
        .partitions
        .iter()
        .map(|p| partition_prompt(settings, p))
        .collect();
    let mut failed_partitions = 0;
    for outcome in pool.run(prompts, observer).await {
        let partition = &mut plan.partitions[outcome.index];
        match outcome.output {
            Ok(text) => partition.result = Some(text),
            Err(error) => {
                warn!(partition = %partition.label(), %error, "partition reduce failed");
                failed_partitions += 1;
            }
        }
    }

    let reduced: Vec<Partition> = plan
        .partitions
        .into_iter()
        .filter(|p| p.result.is_some())
        .collect();
    let text = match reduced.as_slice() {
        [] => String::new(),
        [only] => only.result.clone().unwrap_or_default(),
        many => {
            let shared = shared_record_ids(many);
            match pool.invoke(&merge_prompt(settings, many, &shared)).await {
                (Ok(text), _) => text,
                (Err(e), _) => {
                    warn!(error = %e, "partition merge failed, returning partition results");
                    partition_results(many)
                }
            }
        }
    };

    ShuffleOutcome {
        text,
        partitions: reduced.len() + failed_partitions,
        failed_partitions,
        skipped_records: plan.skipped,
    }
}
