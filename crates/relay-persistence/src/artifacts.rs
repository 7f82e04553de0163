//! Storage for large text outputs that do not fit in a chat message.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::atomic::write_atomic;
use crate::error::Result;

/// Writes named text artifacts under a single directory.
///
/// File names are `{stem}_{timestamp}.{ext}` so repeated outputs for the
/// same job or agent never overwrite each other.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves `contents` and returns the path of the written file.
    pub fn save_text(&self, stem: &str, extension: &str, contents: &str) -> Result<PathBuf> {
        let name = format!(
            "{}_{}.{}",
            sanitize_stem(stem),
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            extension.trim_start_matches('.')
        );
        let path = self.dir.join(name);
        write_atomic(&path, contents.as_bytes())?;
        Ok(path)
    }
}

fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "output".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_text() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("files"));

        let path = store.save_text("job-1", "md", "# Report").unwrap();

        assert!(path.starts_with(dir.path().join("files")));
        assert_eq!(path.extension().unwrap(), "md");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report");
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("swarm:review/1"), "swarm_review_1");
        assert_eq!(sanitize_stem(""), "output");
    }
}
