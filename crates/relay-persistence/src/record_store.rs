//! File-backed store for queue records.

use std::fs;
use std::path::{Path, PathBuf};

use relay_models::{ResponseId, ResponseItem, WorkId, WorkItem};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::atomic::{read_json, remove_if_exists, write_json_atomic};
use crate::error::{PersistenceError, Result};

/// Persists work and response records, one JSON file per record:
///
/// ```text
/// base_path/
/// ├── work/
/// │   ├── work-1760000000000_3f9a1c2.json
/// │   └── ...
/// └── responses/
///     └── resp-1760000000123_a81e004.json
/// ```
///
/// The store does not interpret record states; it only writes and reads
/// them. Ordering and transitions belong to the queue.
#[derive(Debug, Clone)]
pub struct RecordStore {
    base_path: PathBuf,
}

impl RecordStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn work_dir(&self) -> PathBuf {
        self.base_path.join("work")
    }

    fn responses_dir(&self) -> PathBuf {
        self.base_path.join("responses")
    }

    fn work_path(&self, id: &WorkId) -> PathBuf {
        self.work_dir().join(format!("{}.json", id))
    }

    fn response_path(&self, id: &ResponseId) -> PathBuf {
        self.responses_dir().join(format!("{}.json", id))
    }

    pub fn save_work(&self, item: &WorkItem) -> Result<()> {
        write_json_atomic(&self.work_path(&item.id), item)
    }

    pub fn load_work(&self, id: &WorkId) -> Result<WorkItem> {
        let path = self.work_path(id);
        if !path.exists() {
            return Err(PersistenceError::NotFound {
                kind: "work".to_string(),
                id: id.to_string(),
            });
        }
        read_json(&path)
    }

    /// Lists every work record, oldest first.
    pub fn list_work(&self) -> Result<Vec<WorkItem>> {
        let mut items: Vec<WorkItem> = list_records(&self.work_dir())?;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    pub fn delete_work(&self, id: &WorkId) -> Result<bool> {
        remove_if_exists(&self.work_path(id))
    }

    pub fn save_response(&self, item: &ResponseItem) -> Result<()> {
        write_json_atomic(&self.response_path(&item.id), item)
    }

    /// Lists every response record, oldest first.
    pub fn list_responses(&self) -> Result<Vec<ResponseItem>> {
        let mut items: Vec<ResponseItem> = list_records(&self.responses_dir())?;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    pub fn delete_response(&self, id: &ResponseId) -> Result<bool> {
        remove_if_exists(&self.response_path(id))
    }
}

/// Reads every `*.json` record in `dir`. Unreadable records are skipped
/// with a warning so one corrupt file cannot block startup.
fn list_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let read_err = |source| PersistenceError::ReadError {
        path: dir.to_path_buf(),
        source,
    };

    let mut records = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        match read_json::<T>(&path) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
        }
    }
    Ok(records)
}
