//! Text of progress updates and the final job report.

use crate::job::SwarmJob;

pub fn progress_message(swarm: &str, completed: usize, total: usize) -> String {
    format!("Swarm {}: {}/{} batches processed", swarm, completed, total)
}

/// Summary header followed by the reduced text.
pub fn render_report(swarm: &str, job: &SwarmJob, text: &str) -> String {
    let total = job.batches.len();
    let mut header = format!(
        "Swarm {} finished: {}/{} batches succeeded",
        swarm,
        job.succeeded(),
        total
    );
    if job.failed() > 0 {
        header.push_str(&format!(", {} failed", job.failed()));
    }
    if job.skipped_items > 0 {
        header.push_str(&format!(
            " ({} of {} items; {} over the item limit were skipped)",
            job.items.len(),
            job.items.len() + job.skipped_items,
            job.skipped_items
        ));
    } else {
        header.push_str(&format!(" ({} items)", job.items.len()));
    }

    if text.trim().is_empty() {
        header
    } else {
        format!("{}\n\n{}", header, text.trim())
    }
}

pub fn render_failure(swarm: &str, error: &str) -> String {
    format!("Swarm {} failed: {}", swarm, error)
}
