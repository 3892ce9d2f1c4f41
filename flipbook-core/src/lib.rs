use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod book;
pub mod config;
pub mod editor;
pub mod error;
pub mod history;
pub mod sync;
pub mod viewer;

pub use book::{page_label, Book, BulkItem, PageId, PageSlot, TextOverlay};
pub use config::{Capabilities, Config};
pub use editor::{Editor, EditorState, SaveReport};
pub use error::{FlipbookError, StoreError, UploadError, ViewerError};
pub use history::History;
pub use sync::{DeleteReport, RetryPolicy, SyncQueue, SyncReport, WriteOp};
pub use viewer::{Viewer, ViewerOptions};

/// A page record as kept by the remote store, keyed by positional index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub page_index: usize,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_name: Option<String>,
}

/// Keeps the records whose index fits in a book of at most `max_pages` slots.
pub fn bounded_records(records: Vec<PageRecord>, max_pages: usize) -> Vec<PageRecord> {
    let (kept, dropped): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|record| record.page_index < max_pages);
    for record in &dropped {
        warn!(
            page_index = record.page_index,
            max_pages, "ignoring page record past the page limit"
        );
    }
    kept
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub allow_download: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text_overlays: Vec<TextOverlay>,
}

/// A published, read-only copy of a book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    #[serde(rename = "images")]
    pub pages: Vec<PublishedPage>,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProjectSnapshot {
    pub fn from_book(book: &Book, settings: ProjectSettings, password: Option<String>) -> Self {
        let pages = book
            .slots()
            .iter()
            .map(|slot| PublishedPage {
                url: slot.image_url.clone(),
                page_name: slot.name.clone(),
                text_overlays: slot.overlays.clone(),
            })
            .collect();
        Self {
            pages,
            settings,
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn requires_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// A local file about to be sent to the image host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        let bytes = fs::read(path).map_err(|err| UploadError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { file_name, bytes })
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    AddPage,
    RemoveLastContentPage,
    Reorder { from: usize, to: usize },
    SetImage { index: usize, url: String },
    ClearImage { index: usize },
    ClearImages { indices: Vec<usize> },
    ClearAll,
    Rename { index: usize, name: String },
    BulkInsert { items: Vec<BulkItem> },
    AddOverlay { index: usize, overlay: TextOverlay },
    RemoveOverlay { index: usize, overlay: usize },
    SelectPage { index: usize },
    NextPage { count: usize },
    PrevPage { count: usize },
    Undo,
    Redo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    PagesChanged,
    SelectionChanged(usize),
    StateChanged(EditorState),
    Alert(String),
    Synced { written: usize, failed: usize },
    Saved(chrono::DateTime<chrono::Utc>),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self) -> Result<Vec<PageRecord>, StoreError>;
    /// Creates or replaces the record at `record.page_index`.
    async fn upsert(&self, record: &PageRecord) -> Result<(), StoreError>;
    async fn delete(&self, page_index: usize) -> Result<(), StoreError>;
    /// Batched delete. Backends without a batch route answer `StoreError::EndpointMissing`.
    async fn delete_many(&self, page_indexes: &[usize]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ImageUploader: Send + Sync {
    /// Uploads the file and returns its public URL.
    async fn upload(&self, file: &UploadFile) -> Result<String, UploadError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn fetch(&self, share_id: &str) -> Result<ProjectSnapshot, StoreError>;
    /// Publishes a snapshot and returns the share id assigned to it.
    async fn publish(&self, snapshot: &ProjectSnapshot) -> Result<String, StoreError>;
    async fn track_view(&self, share_id: &str, page_index: usize) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List,
    Upsert(usize),
    Delete(usize),
    DeleteMany(Vec<usize>),
}

/// In-process record store. Useful offline and as a test double.
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<usize, PageRecord>>,
    calls: Mutex<Vec<StoreCall>>,
    bulk_delete: bool,
    failing: Mutex<BTreeSet<usize>>,
    offline: Mutex<bool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            bulk_delete: true,
            failing: Mutex::new(BTreeSet::new()),
            offline: Mutex::new(false),
        }
    }

    /// A store whose batched delete route is missing.
    pub fn without_bulk_delete() -> Self {
        Self {
            bulk_delete: false,
            ..Self::new()
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = PageRecord>) -> Self {
        let store = Self::new();
        store.seed(records);
        store
    }

    pub fn seed(&self, records: impl IntoIterator<Item = PageRecord>) {
        let mut guard = self.records.lock();
        for record in records {
            guard.insert(record.page_index, record);
        }
    }

    /// Makes every write touching `page_index` fail with a non-retryable status.
    pub fn fail_index(&self, page_index: usize) {
        self.failing.lock().insert(page_index);
    }

    pub fn heal_index(&self, page_index: usize) {
        self.failing.lock().remove(&page_index);
    }

    /// Makes every call fail with a transport error until set back to `false`.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    pub fn snapshot(&self) -> BTreeMap<usize, PageRecord> {
        self.records.lock().clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn check(&self, page_index: Option<usize>) -> Result<(), StoreError> {
        if *self.offline.lock() {
            return Err(StoreError::Transport("store offline".into()));
        }
        if let Some(index) = page_index {
            if self.failing.lock().contains(&index) {
                return Err(StoreError::Status { status: 400 });
            }
        }
        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list(&self) -> Result<Vec<PageRecord>, StoreError> {
        self.calls.lock().push(StoreCall::List);
        self.check(None)?;
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn upsert(&self, record: &PageRecord) -> Result<(), StoreError> {
        self.calls.lock().push(StoreCall::Upsert(record.page_index));
        self.check(Some(record.page_index))?;
        self.records
            .lock()
            .insert(record.page_index, record.clone());
        Ok(())
    }

    async fn delete(&self, page_index: usize) -> Result<(), StoreError> {
        self.calls.lock().push(StoreCall::Delete(page_index));
        self.check(Some(page_index))?;
        self.records.lock().remove(&page_index);
        Ok(())
    }

    async fn delete_many(&self, page_indexes: &[usize]) -> Result<(), StoreError> {
        self.calls
            .lock()
            .push(StoreCall::DeleteMany(page_indexes.to_vec()));
        if !self.bulk_delete {
            return Err(StoreError::EndpointMissing("/api/images/bulk".into()));
        }
        self.check(None)?;
        for index in page_indexes {
            self.check(Some(*index))?;
        }
        let mut guard = self.records.lock();
        for index in page_indexes {
            guard.remove(index);
        }
        Ok(())
    }
}

/// In-process publish/share store.
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: Mutex<HashMap<String, ProjectSnapshot>>,
    views: Mutex<Vec<(String, usize)>>,
    reject_views: bool,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose analytics route always fails.
    pub fn with_failing_analytics() -> Self {
        Self {
            reject_views: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, share_id: impl Into<String>, snapshot: ProjectSnapshot) {
        self.projects.lock().insert(share_id.into(), snapshot);
    }

    pub fn get(&self, share_id: &str) -> Option<ProjectSnapshot> {
        self.projects.lock().get(share_id).cloned()
    }

    pub fn views(&self) -> Vec<(String, usize)> {
        self.views.lock().clone()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn fetch(&self, share_id: &str) -> Result<ProjectSnapshot, StoreError> {
        self.get(share_id).ok_or(StoreError::NotFound)
    }

    async fn publish(&self, snapshot: &ProjectSnapshot) -> Result<String, StoreError> {
        let mut guard = self.projects.lock();
        let share_id = format!("book-{}", guard.len() + 1);
        guard.insert(share_id.clone(), snapshot.clone());
        Ok(share_id)
    }

    async fn track_view(&self, share_id: &str, page_index: usize) -> Result<(), StoreError> {
        if self.reject_views {
            return Err(StoreError::Status { status: 500 });
        }
        self.views.lock().push((share_id.to_string(), page_index));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_record_uses_camel_case_wire_names() {
        let record = PageRecord {
            page_index: 4,
            url: "https://img/a.jpg".into(),
            page_name: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "pageIndex": 4, "url": "https://img/a.jpg" })
        );

        let parsed: PageRecord =
            serde_json::from_str(r#"{"pageIndex":2,"url":"u","pageName":"Intro"}"#).unwrap();
        assert_eq!(parsed.page_name.as_deref(), Some("Intro"));
    }

    #[test]
    fn snapshot_from_book_carries_names_and_overlays() {
        let mut book = Book::new(1);
        book.set_image(1, "u").unwrap();
        book.rename(1, "Middle").unwrap();
        book.add_overlay(1, TextOverlay::new("hi", 50.0, 50.0)).unwrap();

        let snapshot = ProjectSnapshot::from_book(&book, ProjectSettings::default(), Some(String::new()));
        assert_eq!(snapshot.pages.len(), 3);
        assert_eq!(snapshot.pages[1].url.as_deref(), Some("u"));
        assert_eq!(snapshot.pages[1].page_name.as_deref(), Some("Middle"));
        assert_eq!(snapshot.pages[1].text_overlays.len(), 1);
        assert!(!snapshot.requires_password());
    }

    #[test]
    fn snapshot_reads_hosted_images_with_percent_overlays() {
        let snapshot: ProjectSnapshot = serde_json::from_str(
            r##"{"images":[{"url":"https://img/0.jpg","textOverlays":[{"id":7,"text":"Class of 2024","x":50,"y":12.5,"fontSize":32,"color":"#fff","fontFamily":"serif"}]},{"url":null}],"settings":{"allowDownload":true},"password":""}"##,
        )
        .unwrap();
        assert_eq!(snapshot.pages.len(), 2);
        let overlay = &snapshot.pages[0].text_overlays[0];
        assert_eq!((overlay.x, overlay.y), (50.0, 12.5));
        assert_eq!(overlay.font_family.as_deref(), Some("serif"));
        assert!(snapshot.settings.allow_download);
        assert!(!snapshot.requires_password());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("images").is_some());
        assert!(json.get("pages").is_none());
    }

    #[test]
    fn upload_file_reads_name_and_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("portrait.png");
        std::fs::write(&path, b"bytes").unwrap();

        let file = UploadFile::from_path(&path).unwrap();
        assert_eq!(file.file_name, "portrait.png");
        assert_eq!(file.bytes, b"bytes");

        let missing = UploadFile::from_path(&dir.path().join("nope.png"));
        assert!(matches!(missing, Err(UploadError::Io { .. })));
    }

    #[test]
    fn bounded_records_drop_indices_past_the_limit() {
        let record = |page_index| PageRecord {
            page_index,
            url: "u".into(),
            page_name: None,
        };
        let kept = bounded_records(
            vec![record(usize::MAX), record(3), record(1 << 32), record(9), record(10)],
            10,
        );
        let indices: Vec<usize> = kept.iter().map(|r| r.page_index).collect();
        assert_eq!(indices, vec![3, 9]);
    }

    #[tokio::test]
    async fn memory_store_without_bulk_route_reports_missing_endpoint() {
        let store = MemoryRecordStore::without_bulk_delete();
        let err = store.delete_many(&[1, 2]).await.unwrap_err();
        assert!(matches!(err, StoreError::EndpointMissing(_)));
        assert!(!err.is_retryable());
    }
}
