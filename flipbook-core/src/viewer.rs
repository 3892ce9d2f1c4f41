use tracing::{debug, info, instrument};

use crate::book::page_label;
use crate::error::{StoreError, ViewerError};
use crate::{bounded_records, PageRecord, ProjectSettings, ProjectStore, PublishedPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerOptions {
    pub analytics: bool,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self { analytics: true }
    }
}

/// Read-only view of a published book, or of the live record store.
#[derive(Debug, Clone)]
pub struct Viewer {
    share_id: Option<String>,
    pages: Vec<PublishedPage>,
    settings: ProjectSettings,
    password: Option<String>,
    unlocked: bool,
    current: usize,
    options: ViewerOptions,
}

impl Viewer {
    /// Fetches the published snapshot for `share_id`.
    ///
    /// Books without a password count a view straight away; locked books count
    /// one once [`Viewer::unlock`] succeeds.
    #[instrument(skip(store, options))]
    pub async fn open(
        store: &dyn ProjectStore,
        share_id: &str,
        options: ViewerOptions,
    ) -> Result<Self, ViewerError> {
        let snapshot = store.fetch(share_id).await.map_err(|err| match err {
            StoreError::NotFound | StoreError::EndpointMissing(_) => ViewerError::NotFound,
            other => ViewerError::Unavailable(other.to_string()),
        })?;
        if snapshot.pages.is_empty() {
            return Err(ViewerError::NoContent);
        }

        let locked = snapshot.requires_password();
        let viewer = Self {
            share_id: Some(share_id.to_string()),
            pages: snapshot.pages,
            settings: snapshot.settings,
            password: snapshot.password,
            unlocked: !locked,
            current: 0,
            options,
        };
        info!(pages = viewer.pages.len(), locked, "opened shared book");
        if !locked {
            viewer.track_view(store).await;
        }
        Ok(viewer)
    }

    /// Builds a viewer straight from page records. Indices with no record become blank pages.
    ///
    /// Records at or past `max_pages` are ignored.
    pub fn from_records(records: &[PageRecord], max_pages: usize) -> Result<Self, ViewerError> {
        let records = bounded_records(records.to_vec(), max_pages);
        let len = records
            .iter()
            .map(|record| record.page_index + 1)
            .max()
            .ok_or(ViewerError::NoContent)?;
        let mut pages = vec![PublishedPage::default(); len];
        for record in &records {
            let page = &mut pages[record.page_index];
            page.url = Some(record.url.clone()).filter(|url| !url.is_empty());
            page.page_name = record.page_name.clone();
        }
        Ok(Self {
            share_id: None,
            pages,
            settings: ProjectSettings::default(),
            password: None,
            unlocked: true,
            current: 0,
            options: ViewerOptions { analytics: false },
        })
    }

    pub fn is_locked(&self) -> bool {
        !self.unlocked
    }

    pub async fn unlock(&mut self, store: &dyn ProjectStore, attempt: &str) -> Result<(), ViewerError> {
        if self.unlocked {
            return Ok(());
        }
        if self.password.as_deref() != Some(attempt) {
            debug!("rejected viewer password");
            return Err(ViewerError::IncorrectPassword);
        }
        self.unlocked = true;
        self.track_view(store).await;
        Ok(())
    }

    async fn track_view(&self, store: &dyn ProjectStore) {
        if !self.options.analytics {
            return;
        }
        let Some(share_id) = self.share_id.as_deref() else {
            return;
        };
        if let Err(err) = store.track_view(share_id, 0).await {
            debug!(%err, share_id, "failed to record view");
        }
    }

    pub fn share_id(&self) -> Option<&str> {
        self.share_id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.settings.title.as_deref()
    }

    pub fn download_allowed(&self) -> bool {
        self.settings.allow_download
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> Result<&[PublishedPage], ViewerError> {
        if self.is_locked() {
            return Err(ViewerError::Locked);
        }
        Ok(&self.pages)
    }

    pub fn current_page(&self) -> Result<&PublishedPage, ViewerError> {
        self.pages()?
            .get(self.current)
            .ok_or(ViewerError::NoContent)
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn label(&self, index: usize) -> String {
        let custom = self
            .pages
            .get(index)
            .and_then(|page| page.page_name.as_deref());
        page_label(index, self.pages.len(), custom)
    }

    pub fn labels(&self) -> Vec<String> {
        (0..self.pages.len()).map(|index| self.label(index)).collect()
    }

    pub fn goto(&mut self, index: usize) -> usize {
        self.current = index.min(self.pages.len().saturating_sub(1));
        self.current
    }

    pub fn next(&mut self) -> usize {
        self.goto(self.current.saturating_add(1))
    }

    pub fn prev(&mut self) -> usize {
        self.goto(self.current.saturating_sub(1))
    }

    /// Pages within `distance` of the current one, nearest first, previous before next.
    pub fn neighbors(&self, distance: usize) -> Vec<usize> {
        let mut around = Vec::with_capacity(distance * 2);
        for step in 1..=distance {
            if let Some(before) = self.current.checked_sub(step) {
                around.push(before);
            }
            let after = self.current + step;
            if after < self.pages.len() {
                around.push(after);
            }
        }
        around
    }
}
