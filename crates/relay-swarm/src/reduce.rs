//! Reduce strategies for map outputs.

use relay_core::{ReduceSettings, ReduceStrategy};
use tracing::{debug, info, warn};

use crate::job::Batch;
use crate::pool::{Quiet, WorkerPool};
use crate::template::fill;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceOutcome {
    pub text: String,
    /// Strategy that actually produced `text`.
    pub strategy: ReduceStrategy,
}

/// Every batch under a numbered header. Failed batches are listed with
/// their error so nothing is silently lost.
pub fn concatenate(batches: &[Batch]) -> String {
    let total = batches.len();
    batches
        .iter()
        .map(|b| {
            let header = format!("## Batch {}/{}", b.index + 1, total);
            match (&b.result, &b.error) {
                (Some(result), _) => format!("{}\n{}", header, result.trim()),
                (None, Some(error)) => {
                    format!("{} (failed after {} attempts)\n{}", header, b.attempts, error)
                }
                (None, None) => format!("{} (not processed)", header),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn sections(results: &[String]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("--- Result {} ---\n{}", i + 1, r.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Reduces the batch results with the configured strategy.
///
/// `summarize` switches to `hierarchical` when its input is larger than
/// `max_chars`. A failed summarize call falls back to `concatenate`.
pub async fn reduce(pool: &WorkerPool, settings: &ReduceSettings, batches: &[Batch]) -> ReduceOutcome {
    let results: Vec<String> = batches.iter().filter_map(|b| b.result.clone()).collect();
    let concatenated = || ReduceOutcome {
        text: concatenate(batches),
        strategy: ReduceStrategy::Concatenate,
    };

    match settings.strategy {
        ReduceStrategy::Concatenate => concatenated(),
        _ if results.is_empty() => {
            debug!("no successful batches to summarize");
            concatenated()
        }
        ReduceStrategy::Summarize => {
            let input = sections(&results);
            let size = input.chars().count();
            if size > settings.max_chars {
                info!(size, max = settings.max_chars, "reduce input too large, summarizing hierarchically");
                return ReduceOutcome {
                    text: hierarchical(pool, settings, results).await,
                    strategy: ReduceStrategy::Hierarchical,
                };
            }
            match pool.invoke(&fill(&settings.prompt, &[("results", &input)])).await {
                (Ok(text), _) => ReduceOutcome {
                    text,
                    strategy: ReduceStrategy::Summarize,
                },
                (Err(e), _) => {
                    warn!(error = %e, "summarize failed, concatenating batch outputs");
                    concatenated()
                }
            }
        }
        ReduceStrategy::Hierarchical => ReduceOutcome {
            text: hierarchical(pool, settings, results).await,
            strategy: ReduceStrategy::Hierarchical,
        },
    }
}

/// Summarizes groups of `fan_in` results in parallel, then the group
/// summaries, until one text remains. A group whose call fails carries its
/// inputs forward unsummarized.
pub async fn hierarchical(pool: &WorkerPool, settings: &ReduceSettings, results: Vec<String>) -> String {
    let fan_in = settings.fan_in.max(2);
    let mut level = results;
    let mut round = 0;

    while !level.is_empty() {
        round += 1;
        let groups: Vec<Vec<String>> = level.chunks(fan_in).map(<[String]>::to_vec).collect();
        debug!(round, inputs = level.len(), groups = groups.len(), "hierarchical reduce round");

        let prompts = groups
            .iter()
            .map(|g| fill(&settings.prompt, &[("results", &sections(g))]))
            .collect();
        level = pool
            .run(prompts, &Quiet)
            .await
            .into_iter()
            .zip(groups)
            .map(|(outcome, group)| {
                outcome.output.unwrap_or_else(|error| {
                    warn!(round, %error, "group summary failed, keeping its inputs");
                    sections(&group)
                })
            })
            .collect();

        if level.len() == 1 {
            break;
        }
    }
    level.pop().unwrap_or_default()
}
