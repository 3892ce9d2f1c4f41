use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::book::{Book, BulkItem};
use crate::config::{Capabilities, Config};
use crate::error::{FlipbookError, StoreError};
use crate::history::History;
use crate::sync::{reconcile_orphans, DeleteReport, RetryPolicy, SyncQueue, SyncReport};
use crate::{
    Command, EditorEvent, ImageUploader, ProjectSettings, ProjectSnapshot, ProjectStore,
    bounded_records, RecordStore, UploadFile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Loading,
    Ready,
    Saving,
    Uploading,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: Vec<usize>,
    pub failed: Vec<usize>,
    pub orphans: DeleteReport,
}

impl SaveReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.orphans.is_clean()
    }
}

/// The editing session for one book.
///
/// Local edits apply immediately and are mirrored to the record store through
/// the sync queue. Undo/redo snapshots cover the whole [`Book`] (order, images,
/// names, overlays). Selection, editing state and the sync queue are not part of
/// a snapshot.
pub struct Editor {
    book: Book,
    history: History<Book>,
    selected: usize,
    state: EditorState,
    queue: SyncQueue,
    dirty: bool,
    last_saved: Option<DateTime<Utc>>,
    capabilities: Capabilities,
    max_pages: usize,
    retry: RetryPolicy,
    store: Arc<dyn RecordStore>,
    uploader: Arc<dyn ImageUploader>,
    events: Arc<Mutex<Vec<EditorEvent>>>,
}

impl Editor {
    pub fn new(
        config: &Config,
        store: Arc<dyn RecordStore>,
        uploader: Arc<dyn ImageUploader>,
    ) -> Self {
        let book = Book::new(config.editor.default_content_pages);
        Self {
            max_pages: config.editor.max_pages.max(book.len()),
            book,
            history: History::new(config.editor.history_limit),
            selected: 0,
            state: EditorState::Loading,
            queue: SyncQueue::new(),
            dirty: false,
            last_saved: None,
            capabilities: config.editor.capabilities,
            retry: config.sync.clone(),
            store,
            uploader,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.last_saved
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn pending_writes(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn events(&self) -> Arc<Mutex<Vec<EditorEvent>>> {
        Arc::clone(&self.events)
    }

    fn emit(&self, event: EventKind) {
        let event = match event {
            EventKind::Pages => EditorEvent::PagesChanged,
            EventKind::Selection => EditorEvent::SelectionChanged(self.selected),
            EventKind::State => EditorEvent::StateChanged(self.state),
        };
        self.events.lock().push(event);
    }

    fn alert(&self, message: impl Into<String>) {
        self.events.lock().push(EditorEvent::Alert(message.into()));
    }

    fn transition(&mut self, next: EditorState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "editor state change");
            self.state = next;
            self.emit(EventKind::State);
        }
    }

    /// Fetches the remote records and merges them into the default book.
    ///
    /// A failed fetch is logged and the session continues with the default pages.
    #[instrument(skip(self))]
    pub async fn load(&mut self) {
        self.transition(EditorState::Loading);
        match self.retry.run("list", || self.store.list()).await {
            Ok(records) => {
                let records = bounded_records(records, self.max_pages);
                if let Some(max_index) = records.iter().map(|r| r.page_index).max() {
                    let added = self.book.expand_to(max_index + 1);
                    if added > 0 {
                        info!(added, "expanded book to fit remote pages");
                    }
                }
                for record in &records {
                    if let Err(err) = self.book.apply_record(record) {
                        warn!(%err, "skipping remote record");
                    }
                }
                info!(records = records.len(), pages = self.book.len(), "loaded book");
            }
            Err(err) => {
                warn!(%err, "failed to fetch page records, starting with an empty book");
            }
        }
        self.history.clear();
        self.queue.clear();
        self.dirty = false;
        self.clamp_selection();
        self.emit(EventKind::Pages);
        self.transition(EditorState::Ready);
    }

    /// Applies a local command. Remote writes are queued, not sent; see [`Editor::flush`].
    pub fn apply(&mut self, command: Command) -> Result<(), FlipbookError> {
        match command {
            Command::SelectPage { index } => {
                self.select(index);
                Ok(())
            }
            Command::NextPage { count } => {
                self.select(self.selected.saturating_add(count.max(1)));
                Ok(())
            }
            Command::PrevPage { count } => {
                self.select(self.selected.saturating_sub(count.max(1)));
                Ok(())
            }
            Command::Undo => {
                self.undo();
                Ok(())
            }
            Command::Redo => {
                self.redo();
                Ok(())
            }
            Command::AddPage => self.mutate(|book| {
                book.add_page();
                Ok(true)
            }),
            Command::RemoveLastContentPage => {
                if self.book.content_pages() <= Book::MIN_CONTENT_PAGES {
                    return Ok(());
                }
                self.mutate(|book| Ok(book.remove_last_content_page().is_some()))?;
                // The removed slot sat just before the closing page; anything past
                // the new last content page is gone.
                let last_content = self.book.len() - 2;
                if self.selected > last_content {
                    self.selected = last_content;
                    self.emit(EventKind::Selection);
                }
                Ok(())
            }
            Command::Reorder { from, to } => self.mutate(|book| book.reorder(from, to)),
            Command::SetImage { index, url } => self.mutate(|book| {
                book.set_image(index, url)?;
                Ok(true)
            }),
            Command::ClearImage { index } => self.mutate(|book| book.clear_image(index)),
            Command::ClearImages { indices } => {
                let len = self.book.len();
                if let Some(index) = indices.iter().copied().find(|index| *index >= len) {
                    return Err(FlipbookError::PageOutOfRange { index, len });
                }
                self.mutate(|book| {
                    let mut changed = false;
                    for index in indices {
                        changed |= book.clear_image(index)?;
                    }
                    Ok(changed)
                })
            }
            Command::ClearAll => self.mutate(|book| {
                let mut changed = false;
                for index in 0..book.len() {
                    changed |= book.clear_image(index)?;
                }
                Ok(changed)
            }),
            Command::Rename { index, name } => self.mutate(|book| {
                let before = book.slot(index).and_then(|slot| slot.name.clone());
                book.rename(index, &name)?;
                Ok(book.slot(index).and_then(|slot| slot.name.clone()) != before)
            }),
            Command::BulkInsert { items } => {
                self.require(self.capabilities.bulk_upload, "bulk upload")?;
                if items.is_empty() {
                    return Ok(());
                }
                self.mutate(|book| Ok(!book.bulk_insert(items).is_empty()))
            }
            Command::AddOverlay { index, overlay } => {
                self.require(self.capabilities.text_overlays, "text overlays")?;
                self.mutate(|book| {
                    book.add_overlay(index, overlay)?;
                    Ok(true)
                })
            }
            Command::RemoveOverlay { index, overlay } => {
                self.require(self.capabilities.text_overlays, "text overlays")?;
                self.mutate(|book| {
                    book.remove_overlay(index, overlay)?;
                    Ok(true)
                })
            }
        }
    }

    fn require(&self, enabled: bool, name: &'static str) -> Result<(), FlipbookError> {
        if enabled {
            Ok(())
        } else {
            Err(FlipbookError::CapabilityDisabled(name))
        }
    }

    /// Runs `change` against a scratch copy of the book. On success with a real
    /// change, the previous book goes on the undo stack and the remote diff is queued.
    fn mutate<F>(&mut self, change: F) -> Result<(), FlipbookError>
    where
        F: FnOnce(&mut Book) -> Result<bool, FlipbookError>,
    {
        let mut next = self.book.clone();
        if !change(&mut next)? {
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.book, next);
        self.queue
            .enqueue_diff(&previous.records(), &self.book.records());
        self.history.record(previous);
        self.after_change();
        Ok(())
    }

    fn after_change(&mut self) {
        self.dirty = true;
        self.clamp_selection();
        self.emit(EventKind::Pages);
    }

    fn restore(&mut self, book: Book) {
        let previous = std::mem::replace(&mut self.book, book);
        self.queue
            .enqueue_diff(&previous.records(), &self.book.records());
        self.after_change();
    }

    pub fn undo(&mut self) -> bool {
        let current = self.book.clone();
        match self.history.undo(current) {
            Some(previous) => {
                self.restore(previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        let current = self.book.clone();
        match self.history.redo(current) {
            Some(next) => {
                self.restore(next);
                true
            }
            None => false,
        }
    }

    pub fn select(&mut self, index: usize) {
        let next = index.min(self.book.len().saturating_sub(1));
        if next != self.selected {
            self.selected = next;
            self.emit(EventKind::Selection);
        }
    }

    fn clamp_selection(&mut self) {
        let max = self.book.len().saturating_sub(1);
        if self.selected > max {
            self.selected = max;
            self.emit(EventKind::Selection);
        }
    }

    fn begin_upload(&mut self) -> Result<(), FlipbookError> {
        if self.state == EditorState::Uploading {
            return Err(FlipbookError::Busy);
        }
        self.transition(EditorState::Uploading);
        Ok(())
    }

    /// Uploads `file` and places it on page `index`.
    ///
    /// On failure the user is alerted and the book is left as it was.
    #[instrument(skip(self, file), fields(file = %file.file_name))]
    pub async fn upload(&mut self, index: usize, file: &UploadFile) -> Result<SyncReport, FlipbookError> {
        let len = self.book.len();
        if index >= len {
            return Err(FlipbookError::PageOutOfRange { index, len });
        }
        self.begin_upload()?;
        let outcome = self.uploader.upload(file).await;
        self.transition(EditorState::Ready);

        match outcome {
            Ok(url) => {
                info!(page_index = index, %url, "uploaded page image");
                self.apply(Command::SetImage { index, url })?;
                Ok(self.flush().await)
            }
            Err(err) => {
                warn!(%err, page_index = index, "image upload failed");
                self.alert("Upload failed!");
                Err(err.into())
            }
        }
    }

    /// Uploads files one after another, then places them with a single bulk insert.
    ///
    /// Files that fail to upload are skipped with an alert; the rest still land.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn bulk_upload(&mut self, files: &[UploadFile]) -> Result<SyncReport, FlipbookError> {
        self.require(self.capabilities.bulk_upload, "bulk upload")?;
        self.begin_upload()?;
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            match self.uploader.upload(file).await {
                Ok(url) => items.push(BulkItem::new(url).with_source_name(file.file_name.clone())),
                Err(err) => {
                    warn!(%err, file = %file.file_name, "bulk upload item failed");
                    self.alert(format!("Upload failed: {}", file.file_name));
                }
            }
        }
        self.transition(EditorState::Ready);

        self.apply(Command::BulkInsert { items })?;
        Ok(self.flush().await)
    }

    /// Sends queued writes to the record store.
    pub async fn flush(&mut self) -> SyncReport {
        let report = self.queue.flush(self.store.as_ref(), &self.retry).await;
        if report.written() > 0 || !report.failed.is_empty() {
            self.events.lock().push(EditorEvent::Synced {
                written: report.written(),
                failed: report.failed.len(),
            });
        }
        report
    }

    /// Flushes pending writes, then removes remote records with no local image.
    #[instrument(skip(self))]
    pub async fn reconcile(&mut self) -> Result<(SyncReport, DeleteReport), StoreError> {
        let report = self.flush().await;
        let orphans = reconcile_orphans(self.store.as_ref(), &self.book.records(), &self.retry).await?;
        Ok((report, orphans))
    }

    /// Re-submits every page holding an image, then removes orphans.
    ///
    /// Clears the unsaved flag and stamps `last_saved` only when everything went through.
    #[instrument(skip(self))]
    pub async fn save_all(&mut self) -> Result<SaveReport, StoreError> {
        self.transition(EditorState::Saving);
        let records = self.book.records();
        let mut report = SaveReport::default();

        for (index, record) in &records {
            match self.retry.run("upsert", || self.store.upsert(record)).await {
                Ok(()) => report.saved.push(*index),
                Err(err) => {
                    warn!(%err, page_index = *index, "failed to save page");
                    report.failed.push(*index);
                }
            }
        }

        let orphans = match reconcile_orphans(self.store.as_ref(), &records, &self.retry).await {
            Ok(orphans) => orphans,
            Err(err) => {
                self.transition(EditorState::Ready);
                return Err(err);
            }
        };
        report.orphans = orphans;

        if report.is_clean() {
            self.queue.clear();
            self.dirty = false;
            let now = Utc::now();
            self.last_saved = Some(now);
            self.events.lock().push(EditorEvent::Saved(now));
            info!(pages = report.saved.len(), "saved book");
        } else {
            warn!(
                failed = report.failed.len(),
                orphans_failed = report.orphans.failed.len(),
                "save finished with failures"
            );
        }
        self.transition(EditorState::Ready);
        Ok(report)
    }

    /// Publishes a read-only copy of the book and returns its share id.
    #[instrument(skip(self, projects, password))]
    pub async fn publish(
        &self,
        projects: &dyn ProjectStore,
        settings: ProjectSettings,
        password: Option<String>,
    ) -> Result<String, FlipbookError> {
        self.require(self.capabilities.sharing, "sharing")?;
        let snapshot = ProjectSnapshot::from_book(&self.book, settings, password);
        let share_id = projects.publish(&snapshot).await?;
        info!(%share_id, pages = snapshot.pages.len(), "published book");
        Ok(share_id)
    }
}

enum EventKind {
    Pages,
    Selection,
    State,
}
