//! Turning raw agent output into a deliverable response body.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use relay_persistence::{ArtifactStore, Result};
use tracing::warn;

fn send_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[send_file:\s*([^\]]+)\]").expect("valid send_file regex"))
}

/// Removes `[send_file: /path]` tags from `text`, returning the cleaned
/// text and the referenced paths in order of appearance (deduplicated).
pub fn collect_file_tags(text: &str) -> (String, Vec<String>) {
    let re = send_file_pattern();
    let mut files: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        let path = caps[1].trim().to_string();
        if !path.is_empty() && !files.contains(&path) {
            files.push(path);
        }
    }
    if files.is_empty() {
        return (text.trim().to_string(), files);
    }
    (re.replace_all(text, "").trim().to_string(), files)
}

/// Applies file-tag extraction and the inline length limit.
#[derive(Debug, Clone)]
pub struct ResponseShaper {
    artifacts: Option<ArtifactStore>,
    max_inline_chars: usize,
    preview_chars: usize,
}

impl Default for ResponseShaper {
    fn default() -> Self {
        Self {
            artifacts: None,
            max_inline_chars: 4000,
            preview_chars: 1500,
        }
    }
}

impl ResponseShaper {
    pub fn new(artifacts: ArtifactStore, max_inline_chars: usize, preview_chars: usize) -> Self {
        Self {
            artifacts: Some(artifacts),
            max_inline_chars,
            preview_chars: preview_chars.min(max_inline_chars),
        }
    }

    /// Returns the body to deliver and the files to attach.
    ///
    /// Bodies longer than the inline limit are written to the artifact
    /// directory (when one is configured); the delivered body is then a
    /// preview plus a pointer to the attached file.
    pub fn shape(&self, stem: &str, raw: &str) -> Result<(String, Vec<String>)> {
        let (body, mut files) = collect_file_tags(raw);
        if body.chars().count() <= self.max_inline_chars {
            return Ok((body, files));
        }
        let Some(artifacts) = &self.artifacts else {
            return Ok((body, files));
        };

        let path = artifacts.save_text(stem, "md", &body)?;
        let preview = preview(&body, self.preview_chars);
        let shaped = format!(
            "{}\n\n[Full response ({} chars) attached as {}]",
            preview,
            body.chars().count(),
            file_name(&path)
        );
        files.push(path.to_string_lossy().into_owned());
        Ok((shaped, files))
    }

    /// Like [`shape`](Self::shape), but a body that cannot be saved is
    /// sent inline in full.
    pub fn shape_or_inline(&self, stem: &str, raw: &str) -> (String, Vec<String>) {
        match self.shape(stem, raw) {
            Ok(shaped) => shaped,
            Err(e) => {
                warn!(stem, error = %e, "failed to save long output, sending inline");
                collect_file_tags(raw)
            }
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_collect_file_tags() {
        let (text, files) = collect_file_tags(
            "Here is the chart [send_file: /tmp/chart.png] and again [send_file:/tmp/chart.png]",
        );
        assert_eq!(text, "Here is the chart  and again");
        assert_eq!(files, vec!["/tmp/chart.png".to_string()]);
    }

    #[test]
    fn test_no_tags_untouched() {
        let (text, files) = collect_file_tags("  plain reply \n");
        assert_eq!(text, "plain reply");
        assert!(files.is_empty());
    }

    #[test]
    fn test_short_body_passes_through() {
        let dir = tempdir().unwrap();
        let shaper = ResponseShaper::new(ArtifactStore::new(dir.path()), 100, 20);
        let (body, files) = shaper.shape("coder", "short").unwrap();
        assert_eq!(body, "short");
        assert!(files.is_empty());
    }

    #[test]
    fn test_long_body_saved_with_preview() {
        let dir = tempdir().unwrap();
        let shaper = ResponseShaper::new(ArtifactStore::new(dir.path()), 100, 20);
        let long = "x".repeat(250);

        let (body, files) = shaper.shape("coder", &long).unwrap();

        assert!(body.starts_with(&"x".repeat(20)));
        assert!(body.contains("250 chars"));
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), long);
    }

    #[test]
    fn test_unwritable_artifacts_fall_back_inline() {
        let shaper = ResponseShaper::new(ArtifactStore::new("/dev/null/not-a-dir"), 10, 5);
        let long = format!("{} [send_file: /tmp/a.png]", "z".repeat(40));

        assert!(shaper.shape("coder", &long).is_err());
        let (body, files) = shaper.shape_or_inline("coder", &long);
        assert_eq!(body, "z".repeat(40));
        assert_eq!(files, vec!["/tmp/a.png".to_string()]);
    }

    #[test]
    fn test_long_body_without_artifacts_is_kept() {
        let shaper = ResponseShaper::default();
        let long = "y".repeat(5000);
        let (body, files) = shaper.shape("coder", &long).unwrap();
        assert_eq!(body.len(), 5000);
        assert!(files.is_empty());
    }
}
