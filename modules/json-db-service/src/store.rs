//! File-backed document store.
//!
//! Each document is a JSON object persisted as `<data_dir>/<name>`, where the
//! name ends in `.json`. Updates are whole-document read-modify-write cycles
//! performed under the document's lane, and every write goes to a temporary
//! sibling that is renamed over the target, so readers only ever see complete
//! documents.
//!
//! Every public operation appends exactly one audit record, success or failure,
//! before it returns.

use crate::audit::{AuditLog, Outcome};
use crate::error::StoreError;
use crate::lanes::{DocumentLaneGuard, DocumentLanes};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

pub const DOCUMENT_EXTENSION: &str = ".json";

/// Result of `delete_file`, which treats a missing target as non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Missing,
}

pub struct DocumentStore {
    data_dir: PathBuf,
    merge_output: PathBuf,
    audit: AuditLog,
    lanes: DocumentLanes,
}

impl DocumentStore {
    /// Open the store, creating the data directory if needed.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        merge_output: impl Into<PathBuf>,
        audit: AuditLog,
    ) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).await?;
        Ok(Self {
            data_dir,
            merge_output: merge_output.into(),
            audit,
            lanes: DocumentLanes::new(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn lanes(&self) -> &DocumentLanes {
        &self.lanes
    }

    // =====================================================
    // Document Operations
    // =====================================================

    /// Create a new document containing `{}`.
    pub async fn create_file(&self, name: &str) -> Result<(), StoreError> {
        let result = self.create_inner(name).await;
        self.finish(result, |_| format!("{}: created", name)).await
    }

    async fn create_inner(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        let lane = self.lanes.acquire(name).await;
        let result = publish_new(&self.path_for(name), b"{}").await;
        self.settle_lane(name, lane, &result);
        result
    }

    /// Raw, unparsed content of a document.
    pub async fn get_file(&self, name: &str) -> Result<String, StoreError> {
        let result = match validate_name(name) {
            Ok(()) => self.read_raw(name).await,
            Err(e) => Err(e),
        };
        self.finish(result, |content| content.clone()).await
    }

    /// Value stored under `key`, or `None` when the document has no such key.
    ///
    /// Presence is checked explicitly, so stored `0`, `""`, `false` and `null`
    /// are returned as values.
    pub async fn get(&self, name: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let result = self.get_inner(name, key).await;
        match &result {
            Ok(Some(value)) => self.audit.success(display_value(value)).await,
            Ok(None) => {
                self.audit
                    .error(format!("{} invalid key on {}", key, name))
                    .await
            }
            Err(e) => self.audit.error(e.message()).await,
        }
        result
    }

    async fn get_inner(&self, name: &str, key: &str) -> Result<Option<Value>, StoreError> {
        validate_name(name)?;
        validate_key(key)?;
        let mut content = self.read_object(name).await?;
        Ok(content.remove(key))
    }

    /// Assign `content[key] = value` and write the document back.
    ///
    /// A missing value (as opposed to an explicit `null`) is rejected.
    pub async fn set(
        &self,
        name: &str,
        key: &str,
        value: impl Into<Option<Value>>,
    ) -> Result<(), StoreError> {
        let value = value.into();
        let shown = value.as_ref().map(display_value).unwrap_or_default();
        let message = format!("{}: {} set in {}", key, shown, name);
        let result = self.set_inner(name, key, value).await;
        self.finish(result, |_| message).await
    }

    async fn set_inner(
        &self,
        name: &str,
        key: &str,
        value: Option<Value>,
    ) -> Result<(), StoreError> {
        validate_name(name)?;
        validate_key(key)?;
        let value =
            value.ok_or_else(|| StoreError::InvalidArgument("Value is missing".to_string()))?;

        let lane = self.lanes.acquire(name).await;
        let result = match self.read_object(name).await {
            Ok(mut content) => {
                content.insert(key.to_string(), value);
                self.write_object(name, &content).await
            }
            Err(e) => Err(e),
        };
        self.settle_lane(name, lane, &result);
        result
    }

    /// Delete `key` from the document. An absent key is a successful no-op.
    pub async fn remove(&self, name: &str, key: &str) -> Result<(), StoreError> {
        let result = self.remove_inner(name, key).await;
        self.finish(result, |removed| {
            if *removed {
                format!("{} deleted from {}", key, name)
            } else {
                format!("{} not present in {}, nothing removed", key, name)
            }
        })
        .await
        .map(|_| ())
    }

    async fn remove_inner(&self, name: &str, key: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        validate_key(key)?;

        let lane = self.lanes.acquire(name).await;
        let result = match self.read_object(name).await {
            Ok(mut content) => {
                if content.remove(key).is_some() {
                    self.write_object(name, &content).await.map(|()| true)
                } else {
                    Ok(false)
                }
            }
            Err(e) => Err(e),
        };
        self.settle_lane(name, lane, &result);
        result
    }

    /// Remove a document. A missing document is logged as an error but not raised.
    pub async fn delete_file(&self, name: &str) -> Result<DeleteOutcome, StoreError> {
        let result = self.delete_inner(name).await;
        match &result {
            Ok(DeleteOutcome::Deleted) => {
                self.audit
                    .success(format!("{} successfully deleted", name))
                    .await
            }
            Ok(DeleteOutcome::Missing) => {
                self.audit.error(format!("{} does not exist", name)).await
            }
            Err(e) => self.audit.error(e.message()).await,
        }
        result
    }

    async fn delete_inner(&self, name: &str) -> Result<DeleteOutcome, StoreError> {
        validate_name(name)?;
        let lane = self.lanes.acquire(name).await;

        let result = match fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::Missing),
            Err(e) => Err(io_error("delete", name, e)),
        };

        // The document is gone either way, so its lane goes too.
        drop(lane);
        self.lanes.release(name);
        result
    }

    /// Combine every document into `{ <name without .json>: <content> }` and
    /// write it to the merge output. One unreadable document aborts the merge.
    pub async fn merge_data(&self) -> Result<Value, StoreError> {
        let result = self.merge_inner().await;
        match &result {
            Ok(_) => self.audit.success("Merged successfully").await,
            Err(e) => {
                self.audit
                    .error(format!("merged unsuccessfully {}", e))
                    .await
            }
        }
        result
    }

    async fn merge_inner(&self) -> Result<Value, StoreError> {
        let names = self.list_documents().await?;

        let mut merged = Map::new();
        for name in &names {
            let content = self.read_object(name).await?;
            merged.insert(document_stem(name).to_string(), Value::Object(content));
        }

        let merged = Value::Object(merged);
        let bytes = serde_json::to_vec(&merged)
            .map_err(|e| StoreError::Io(format!("failed to serialize merge: {}", e)))?;
        write_atomic(&self.merge_output, &bytes).await?;

        log::debug!(
            "[JSON_DB] Merged {} documents into {}",
            names.len(),
            self.merge_output.display()
        );
        Ok(merged)
    }

    // =====================================================
    // Key Set Comparisons
    // =====================================================

    /// Keys of either document, without duplicates.
    pub async fn union(&self, a: &str, b: &str) -> Result<Vec<String>, StoreError> {
        self.compare_keys("union", a, b, |ka, kb| ka.union(kb).cloned().collect())
            .await
    }

    /// Keys both documents share.
    pub async fn intersect(&self, a: &str, b: &str) -> Result<Vec<String>, StoreError> {
        self.compare_keys("intersect", a, b, |ka, kb| {
            ka.intersection(kb).cloned().collect()
        })
        .await
    }

    /// Keys present in exactly one of the two documents.
    pub async fn difference(&self, a: &str, b: &str) -> Result<Vec<String>, StoreError> {
        self.compare_keys("difference", a, b, |ka, kb| {
            ka.symmetric_difference(kb).cloned().collect()
        })
        .await
    }

    async fn compare_keys<F>(
        &self,
        op: &str,
        a: &str,
        b: &str,
        combine: F,
    ) -> Result<Vec<String>, StoreError>
    where
        F: FnOnce(&BTreeSet<String>, &BTreeSet<String>) -> Vec<String>,
    {
        let result = self.compare_keys_inner(a, b, combine).await;
        self.finish(result, |keys| {
            format!("{} of {} and {}: [{}]", op, a, b, keys.join(", "))
        })
        .await
    }

    async fn compare_keys_inner<F>(
        &self,
        a: &str,
        b: &str,
        combine: F,
    ) -> Result<Vec<String>, StoreError>
    where
        F: FnOnce(&BTreeSet<String>, &BTreeSet<String>) -> Vec<String>,
    {
        validate_name(a)?;
        validate_name(b)?;
        let keys_a: BTreeSet<String> = self.read_object(a).await?.keys().cloned().collect();
        let keys_b: BTreeSet<String> = self.read_object(b).await?.keys().cloned().collect();
        Ok(combine(&keys_a, &keys_b))
    }

    // =====================================================
    // Maintenance
    // =====================================================

    /// Write the sample documents, replacing any existing copies.
    pub async fn seed_defaults(&self) -> Result<usize, StoreError> {
        let result = self.seed_inner().await;
        self.finish(result, |count| {
            format!("database seeded with {} documents", count)
        })
        .await
    }

    async fn seed_inner(&self) -> Result<usize, StoreError> {
        let samples = sample_documents();
        for (name, content) in &samples {
            let _lane = self.lanes.acquire(name).await;
            let bytes = serde_json::to_vec(content)
                .map_err(|e| StoreError::Io(format!("failed to serialize {}: {}", name, e)))?;
            write_atomic(&self.path_for(name), &bytes).await?;
        }
        Ok(samples.len())
    }

    /// Names of all documents in the data directory, sorted. Diagnostic only;
    /// not recorded in the audit log.
    pub async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(&self.data_dir).await.map_err(|e| {
            StoreError::Io(format!("failed to scan {}: {}", self.data_dir.display(), e))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("failed to scan {}: {}", self.data_dir.display(), e)))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.ends_with(DOCUMENT_EXTENSION) || name.contains("package") {
                continue;
            }
            if entry.path() == self.merge_output {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    // =====================================================
    // Internals
    // =====================================================

    async fn finish<T>(
        &self,
        result: Result<T, StoreError>,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T, StoreError> {
        match &result {
            Ok(value) => self.audit.append(Outcome::Success, describe(value)).await,
            Err(e) => self.audit.append(Outcome::Error, e.message()).await,
        }
        result
    }

    /// Give the lane back. A failed operation leaves no document behind that
    /// needs the lane, so its map entry is dropped as well.
    fn settle_lane<T>(
        &self,
        name: &str,
        lane: DocumentLaneGuard,
        result: &Result<T, StoreError>,
    ) {
        drop(lane);
        if result.is_err() {
            self.lanes.release(name);
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    async fn read_raw(&self, name: &str) -> Result<String, StoreError> {
        fs::read_to_string(self.path_for(name))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    StoreError::NotFound(format!("no such file or directory {}", name))
                }
                _ => io_error("read", name, e),
            })
    }

    async fn read_object(&self, name: &str) -> Result<Map<String, Value>, StoreError> {
        let raw = self.read_raw(name).await?;
        parse_object(name, &raw)
    }

    async fn write_object(&self, name: &str, content: &Map<String, Value>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(content)
            .map_err(|e| StoreError::Io(format!("failed to serialize {}: {}", name, e)))?;
        write_atomic(&self.path_for(name), &bytes).await
    }
}

/// Document names are plain file names inside the data directory.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidArgument("Filename is missing".to_string()));
    }
    if !name.ends_with(DOCUMENT_EXTENSION) || name.len() == DOCUMENT_EXTENSION.len() {
        return Err(StoreError::InvalidArgument(
            "only files with .json extension allowed".to_string(),
        ));
    }
    if name.contains(&['/', '\\', '\0'][..]) {
        return Err(StoreError::InvalidArgument(format!("invalid file name {}", name)));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("Key name is missing".to_string()));
    }
    Ok(())
}

fn document_stem(name: &str) -> &str {
    name.strip_suffix(DOCUMENT_EXTENSION).unwrap_or(name)
}

/// Strings render bare, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_object(name: &str, raw: &str) -> Result<Map<String, Value>, StoreError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Io(format!("{} does not contain a JSON object", name))),
        Err(e) => Err(StoreError::Io(format!("{} is not valid JSON: {}", name, e))),
    }
}

fn io_error(action: &str, name: &str, e: std::io::Error) -> StoreError {
    StoreError::Io(format!("failed to {} {}: {}", action, name, e))
}

/// File name of `target` and a fresh hidden temporary path next to it.
fn temp_sibling(target: &Path) -> (String, PathBuf) {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    (file_name, tmp)
}

/// Write a temporary sibling and hard-link it to `target`. The link fails if
/// `target` exists, so the document appears complete or not at all.
async fn publish_new(target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let (file_name, tmp) = temp_sibling(target);

    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(io_error("create", &file_name, e));
    }
    let linked = fs::hard_link(&tmp, target).await;
    let _ = fs::remove_file(&tmp).await;

    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(StoreError::Conflict(format!("{} already exists", file_name)))
        }
        Err(e) => Err(io_error("create", &file_name, e)),
    }
}

/// Write to a temporary sibling, then rename over `target`.
async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let (file_name, tmp) = temp_sibling(target);

    if let Err(e) = fs::write(&tmp, bytes).await {
        return Err(StoreError::Io(format!("failed to write {}: {}", file_name, e)));
    }
    if let Err(e) = fs::rename(&tmp, target).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::Io(format!("failed to write {}: {}", file_name, e)));
    }
    Ok(())
}

fn sample_documents() -> Vec<(&'static str, Value)> {
    vec![
        (
            "andrew.json",
            json!({
                "firstname": "Andrew",
                "lastname": "Maney",
                "email": "amaney@talentpath.com",
            }),
        ),
        (
            "scott.json",
            json!({
                "firstname": "Scott",
                "lastname": "Roberts",
                "email": "sroberts@talentpath.com",
                "username": "scoot",
            }),
        ),
        (
            "post.json",
            json!({
                "title": "Async/Await lesson",
                "description": "How to write asynchronous JavaScript",
                "date": "July 15, 2019",
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    async fn open_store() -> (TempDir, DocumentStore) {
        let dir = tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("log.txt"));
        let store = DocumentStore::open(dir.path().join("db"), dir.path().join("merge.json"), audit)
            .await
            .unwrap();
        (dir, store)
    }

    fn log_lines(dir: &TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("log.txt"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    fn write_doc(store: &DocumentStore, name: &str, raw: &str) {
        std::fs::write(store.data_dir().join(name), raw).unwrap();
    }

    #[tokio::test]
    async fn test_create_rejects_names_without_extension() {
        let (dir, store) = open_store().await;

        let err = store.create_file("user.txt").await.unwrap_err();

        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert!(!store.data_dir().join("user.txt").exists());
        let lines = log_lines(&dir);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERROR - only files with .json extension allowed"));
    }

    #[tokio::test]
    async fn test_create_rejects_path_components() {
        let (_dir, store) = open_store().await;

        for name in ["", ".json", "../escape.json", "nested/doc.json"] {
            let err = store.create_file(name).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidArgument(_)), "{:?}", name);
        }
    }

    #[tokio::test]
    async fn test_create_writes_empty_object() {
        let (dir, store) = open_store().await;

        store.create_file("user.json").await.unwrap();

        assert_eq!(store.get_file("user.json").await.unwrap(), "{}");
        assert!(log_lines(&dir)[0].starts_with("SUCCESS - user.json: created "));
    }

    #[tokio::test]
    async fn test_create_conflict_leaves_content_untouched() {
        let (_dir, store) = open_store().await;
        store.create_file("user.json").await.unwrap();
        store.set("user.json", "email", json!("a@b.com")).await.unwrap();

        let err = store.create_file("user.json").await.unwrap_err();

        assert_eq!(err, StoreError::Conflict("user.json already exists".to_string()));
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            store.get("user.json", "email").await.unwrap(),
            Some(json!("a@b.com"))
        );
    }

    #[tokio::test]
    async fn test_set_then_get_returns_value_including_falsy() {
        let (_dir, store) = open_store().await;
        store.create_file("values.json").await.unwrap();

        let values = [
            json!("a@b.com"),
            json!(0),
            json!(""),
            json!(false),
            json!(null),
            json!({"nested": [1, 2]}),
        ];
        for (i, value) in values.iter().enumerate() {
            let key = format!("k{}", i);
            store.set("values.json", &key, value.clone()).await.unwrap();
            assert_eq!(store.get("values.json", &key).await.unwrap(), Some(value.clone()));
        }
    }

    #[tokio::test]
    async fn test_set_on_missing_document_is_not_found() {
        let (dir, store) = open_store().await;

        let err = store.set("ghost.json", "k", json!(1)).await.unwrap_err();

        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
        assert!(!store.data_dir().join("ghost.json").exists());
        assert!(log_lines(&dir)[0].starts_with("ERROR - no such file or directory ghost.json"));
    }

    #[tokio::test]
    async fn test_get_missing_document_is_not_found() {
        let (_dir, store) = open_store().await;

        assert!(matches!(
            store.get("ghost.json", "k").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.get_file("ghost.json").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_remove_then_get_reports_invalid_key() {
        let (dir, store) = open_store().await;
        store.create_file("user.json").await.unwrap();
        store.set("user.json", "email", json!("a@b.com")).await.unwrap();

        store.remove("user.json", "email").await.unwrap();

        assert_eq!(store.get("user.json", "email").await.unwrap(), None);
        let lines = log_lines(&dir);
        assert!(lines.last().unwrap().starts_with("ERROR - email invalid key on user.json "));
        assert_eq!(store.get_file("user.json").await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_remove_absent_key_is_logged_noop() {
        let (dir, store) = open_store().await;
        store.create_file("user.json").await.unwrap();

        store.remove("user.json", "nope").await.unwrap();

        assert!(log_lines(&dir).last().unwrap().starts_with("SUCCESS - nope not present"));
    }

    #[tokio::test]
    async fn test_remove_on_missing_document_is_not_found() {
        let (_dir, store) = open_store().await;

        assert!(matches!(
            store.remove("ghost.json", "k").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_document_does_not_raise() {
        let (dir, store) = open_store().await;

        let outcome = store.delete_file("ghost.json").await.unwrap();

        assert_eq!(outcome, DeleteOutcome::Missing);
        assert!(log_lines(&dir)[0].starts_with("ERROR - ghost.json does not exist "));
    }

    #[tokio::test]
    async fn test_delete_removes_document() {
        let (_dir, store) = open_store().await;
        store.create_file("user.json").await.unwrap();

        assert_eq!(store.delete_file("user.json").await.unwrap(), DeleteOutcome::Deleted);

        assert!(matches!(
            store.get_file("user.json").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert_eq!(store.lanes().stats().total_lanes, 0);
    }

    #[tokio::test]
    async fn test_every_operation_appends_one_line() {
        let (dir, store) = open_store().await;
        write_doc(&store, "other.json", r#"{"a":1}"#);

        let _ = store.create_file("user.json").await;
        let _ = store.create_file("user.json").await;
        let _ = store.create_file("bad.txt").await;
        let _ = store.set("user.json", "k", json!(1)).await;
        let _ = store.set("ghost.json", "k", json!(1)).await;
        let _ = store.get("user.json", "k").await;
        let _ = store.get("user.json", "missing").await;
        let _ = store.get("ghost.json", "k").await;
        let _ = store.get_file("user.json").await;
        let _ = store.remove("user.json", "k").await;
        let _ = store.union("user.json", "other.json").await;
        let _ = store.merge_data().await;
        let _ = store.delete_file("user.json").await;
        let _ = store.delete_file("user.json").await;

        assert_eq!(log_lines(&dir).len(), 14);
    }

    #[tokio::test]
    async fn test_merge_combines_documents_by_stem() {
        let (dir, store) = open_store().await;
        write_doc(&store, "a.json", r#"{"x":1}"#);
        write_doc(&store, "b.json", r#"{"y":2}"#);
        write_doc(&store, "package.json", r#"{"name":"ignored"}"#);
        write_doc(&store, "notes.txt", "not a document");

        let merged = store.merge_data().await.unwrap();

        let expected = json!({"a": {"x": 1}, "b": {"y": 2}});
        assert_eq!(merged, expected);
        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("merge.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk, expected);
        assert!(log_lines(&dir)[0].starts_with("SUCCESS - Merged successfully "));
    }

    #[tokio::test]
    async fn test_merge_is_all_or_nothing() {
        let (dir, store) = open_store().await;
        write_doc(&store, "a.json", r#"{"x":1}"#);
        write_doc(&store, "broken.json", "{not json");

        let err = store.merge_data().await.unwrap_err();

        assert!(matches!(err, StoreError::Io(_)));
        assert!(!dir.path().join("merge.json").exists());
        assert!(log_lines(&dir)[0].starts_with("ERROR - merged unsuccessfully broken.json"));
    }

    #[tokio::test]
    async fn test_non_object_document_is_corrupt() {
        let (_dir, store) = open_store().await;
        write_doc(&store, "list.json", "[1,2,3]");

        let err = store.set("list.json", "k", json!(1)).await.unwrap_err();

        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.get_file("list.json").await.unwrap(), "[1,2,3]");
    }

    #[tokio::test]
    async fn test_concurrent_sets_keep_every_update() {
        let (_dir, store) = open_store().await;
        let store = Arc::new(store);
        store.create_file("shared.json").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set("shared.json", &format!("k{}", i), json!(i)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let raw = store.get_file("shared.json").await.unwrap();
        let content: Map<String, Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(content.len(), 20);
        for i in 0..20 {
            assert_eq!(content[&format!("k{}", i)], json!(i));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_a_half_created_document() {
        let (_dir, store) = open_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..25 {
            let name = format!("doc{}.json", i);
            let reader = {
                let store = store.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        match store.get(&name, "k").await {
                            Ok(None) => return,
                            Err(StoreError::NotFound(_)) => tokio::task::yield_now().await,
                            other => panic!("{} read as {:?}", name, other),
                        }
                    }
                })
            };
            let creator = {
                let store = store.clone();
                tokio::spawn(async move { store.create_file(&name).await })
            };
            handles.push((reader, creator));
        }
        for (reader, creator) in handles {
            creator.await.unwrap().unwrap();
            reader.await.unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(store.data_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[tokio::test]
    async fn test_failed_operations_release_their_lanes() {
        let (_dir, store) = open_store().await;

        for i in 0..100 {
            let name = format!("ghost{}.json", i);
            assert!(store.set(&name, "k", json!(i)).await.is_err());
            assert!(store.remove(&name, "k").await.is_err());
        }
        assert_eq!(store.lanes().stats().total_lanes, 0);

        store.create_file("user.json").await.unwrap();
        let err = store.create_file("user.json").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.lanes().stats().total_lanes, 0);
    }

    #[tokio::test]
    async fn test_set_without_value_is_rejected() {
        let (dir, store) = open_store().await;
        store.create_file("user.json").await.unwrap();

        let err = store.set("user.json", "email", None::<Value>).await.unwrap_err();

        assert_eq!(err, StoreError::InvalidArgument("Value is missing".to_string()));
        assert_eq!(store.get_file("user.json").await.unwrap(), "{}");
        let lines = log_lines(&dir);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("ERROR - Value is missing "));
    }

    #[tokio::test]
    async fn test_key_set_comparisons() {
        let (_dir, store) = open_store().await;
        assert_eq!(store.seed_defaults().await.unwrap(), 3);

        assert_eq!(
            store.union("scott.json", "andrew.json").await.unwrap(),
            vec!["email", "firstname", "lastname", "username"]
        );
        assert_eq!(
            store.intersect("scott.json", "andrew.json").await.unwrap(),
            vec!["email", "firstname", "lastname"]
        );
        assert_eq!(
            store.difference("scott.json", "andrew.json").await.unwrap(),
            vec!["username"]
        );
        let err = store.union("scott.json", "ghost.json").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_documents_skips_temporaries_and_merge_output() {
        let dir = tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("log.txt"));
        let data_dir = dir.path().join("db");
        let store = DocumentStore::open(&data_dir, data_dir.join("merge.json"), audit)
            .await
            .unwrap();
        write_doc(&store, "a.json", "{}");
        write_doc(&store, "merge.json", "{}");
        write_doc(&store, ".a.json.1234.tmp", "{}");

        assert_eq!(store.list_documents().await.unwrap(), vec!["a.json"]);
    }
}
