use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlipbookError;
use crate::PageRecord;

/// Stable identity of a page slot. Survives reorders, unlike the positional index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOverlay {
    pub text: String,
    /// Horizontal centre as a percentage of the page width, 0 to 100.
    pub x: f32,
    /// Vertical centre as a percentage of the page height, 0 to 100.
    pub y: f32,
    #[serde(default = "default_font_size")]
    pub font_size: u16,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
}

fn default_font_size() -> u16 {
    24
}

fn default_color() -> String {
    "#ffffff".to_string()
}

impl TextOverlay {
    pub fn new(text: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            text: text.into(),
            x: clamp_percent(x),
            y: clamp_percent(y),
            font_size: default_font_size(),
            color: default_color(),
            font_family: None,
        }
    }
}

fn clamp_percent(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageSlot {
    pub id: PageId,
    pub image_url: Option<String>,
    pub name: Option<String>,
    pub overlays: Vec<TextOverlay>,
}

impl PageSlot {
    pub fn empty() -> Self {
        Self {
            id: PageId::new(),
            image_url: None,
            name: None,
            overlays: Vec::new(),
        }
    }

    pub fn has_image(&self) -> bool {
        self.image_url.is_some()
    }
}

/// An incoming image for [`Book::bulk_insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub url: String,
    /// Name of the source file, used as the default page name (extension stripped).
    pub source_name: Option<String>,
}

impl BulkItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_name: None,
        }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }
}

/// Ordered page slots: a fixed cover, at least one content page, a fixed closing page.
#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    slots: Vec<PageSlot>,
}

impl Book {
    pub const MIN_CONTENT_PAGES: usize = 1;

    pub fn new(content_pages: usize) -> Self {
        let content_pages = content_pages.max(Self::MIN_CONTENT_PAGES);
        let slots = (0..content_pages + 2).map(|_| PageSlot::empty()).collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn content_pages(&self) -> usize {
        self.slots.len() - 2
    }

    pub fn slots(&self) -> &[PageSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&PageSlot> {
        self.slots.get(index)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut PageSlot, FlipbookError> {
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(FlipbookError::PageOutOfRange { index, len })
    }

    fn closing_index(&self) -> usize {
        self.slots.len() - 1
    }

    /// Adds an empty content page just before the closing page.
    pub fn add_page(&mut self) -> PageId {
        let slot = PageSlot::empty();
        let id = slot.id;
        let at = self.closing_index();
        self.slots.insert(at, slot);
        id
    }

    /// Removes the content page just before the closing page. Refuses when only one is left.
    pub fn remove_last_content_page(&mut self) -> Option<(usize, PageSlot)> {
        if self.content_pages() <= Self::MIN_CONTENT_PAGES {
            return None;
        }
        let index = self.closing_index() - 1;
        Some((index, self.slots.remove(index)))
    }

    /// Grows the content-page count until the book has at least `len` slots.
    pub fn expand_to(&mut self, len: usize) -> usize {
        let mut added = 0;
        while self.slots.len() < len {
            self.add_page();
            added += 1;
        }
        added
    }

    /// Moves the slot at `from` to `to`, shifting the slots in between.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<bool, FlipbookError> {
        let len = self.slots.len();
        if from >= len {
            return Err(FlipbookError::PageOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(FlipbookError::PageOutOfRange { index: to, len });
        }
        if from == to {
            return Ok(false);
        }
        let slot = self.slots.remove(from);
        self.slots.insert(to, slot);
        Ok(true)
    }

    pub fn set_image(&mut self, index: usize, url: impl Into<String>) -> Result<(), FlipbookError> {
        self.slot_mut(index)?.image_url = Some(url.into());
        Ok(())
    }

    pub fn clear_image(&mut self, index: usize) -> Result<bool, FlipbookError> {
        Ok(self.slot_mut(index)?.image_url.take().is_some())
    }

    /// Sets a custom label. Blank input clears it, falling back to the positional label.
    pub fn rename(&mut self, index: usize, name: &str) -> Result<(), FlipbookError> {
        let trimmed = name.trim();
        self.slot_mut(index)?.name = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        Ok(())
    }

    pub fn add_overlay(&mut self, index: usize, overlay: TextOverlay) -> Result<usize, FlipbookError> {
        let slot = self.slot_mut(index)?;
        slot.overlays.push(overlay);
        Ok(slot.overlays.len() - 1)
    }

    pub fn remove_overlay(
        &mut self,
        index: usize,
        overlay: usize,
    ) -> Result<TextOverlay, FlipbookError> {
        let slot = self.slot_mut(index)?;
        if overlay >= slot.overlays.len() {
            return Err(FlipbookError::OverlayOutOfRange { index, overlay });
        }
        Ok(slot.overlays.remove(overlay))
    }

    /// Places each image into the first empty slot, appending content pages once
    /// none are left. Returns the id of the slot each item landed in, in input order.
    pub fn bulk_insert(&mut self, items: Vec<BulkItem>) -> Vec<PageId> {
        let mut placed = Vec::with_capacity(items.len());
        for item in items {
            let index = match self.slots.iter().position(|slot| slot.image_url.is_none()) {
                Some(index) => index,
                None => {
                    self.add_page();
                    self.closing_index() - 1
                }
            };
            let slot = &mut self.slots[index];
            slot.image_url = Some(item.url);
            if let Some(stem) = item.source_name.as_deref().and_then(file_stem) {
                slot.name = Some(stem);
            }
            placed.push(slot.id);
        }
        placed
    }

    pub fn label(&self, index: usize) -> String {
        let custom = self.slots.get(index).and_then(|slot| slot.name.as_deref());
        page_label(index, self.slots.len(), custom)
    }

    pub fn labels(&self) -> Vec<String> {
        (0..self.slots.len()).map(|idx| self.label(idx)).collect()
    }

    pub fn position_of(&self, id: PageId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    /// The remote view of this book: one record per slot that holds an image.
    pub fn records(&self) -> BTreeMap<usize, PageRecord> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.image_url.as_ref().map(|url| {
                    (
                        index,
                        PageRecord {
                            page_index: index,
                            url: url.clone(),
                            page_name: slot.name.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    /// Merges a remote record into the slot at its index. Remote values win where present.
    pub(crate) fn apply_record(&mut self, record: &PageRecord) -> Result<(), FlipbookError> {
        let slot = self.slot_mut(record.page_index)?;
        if !record.url.is_empty() {
            slot.image_url = Some(record.url.clone());
        }
        if let Some(name) = record.page_name.as_deref().filter(|n| !n.trim().is_empty()) {
            slot.name = Some(name.to_string());
        }
        Ok(())
    }
}

/// Label for the slot at `index` in a book of `len` slots.
///
/// A non-blank custom name always wins; otherwise the first slot is the cover,
/// the last is the closing page, and everything in between is `Page {index}`.
pub fn page_label(index: usize, len: usize, custom: Option<&str>) -> String {
    if let Some(name) = custom.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if index == 0 {
        "Cover".to_string()
    } else if index + 1 == len {
        "Closing".to_string()
    } else {
        format!("Page {}", index)
    }
}

fn file_stem(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = match base.rfind('.') {
        Some(0) | None => base,
        Some(dot) => &base[..dot],
    };
    let stem = stem.trim();
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(book: &Book) -> Vec<Option<&str>> {
        book.slots().iter().map(|s| s.image_url.as_deref()).collect()
    }

    #[test]
    fn slot_count_tracks_content_pages() {
        let mut book = Book::new(3);
        assert_eq!(book.len(), 5);
        book.add_page();
        assert_eq!(book.content_pages(), 4);
        assert_eq!(book.len(), 6);

        for _ in 0..10 {
            book.remove_last_content_page();
            assert!(book.content_pages() >= 1);
            assert_eq!(book.len(), book.content_pages() + 2);
        }
        assert_eq!(book.content_pages(), 1);
    }

    #[test]
    fn removing_content_pages_stops_at_one() {
        let mut book = Book::new(3);
        assert!(book.remove_last_content_page().is_some());
        assert!(book.remove_last_content_page().is_some());
        assert_eq!(book.labels(), vec!["Cover", "Page 1", "Closing"]);
        assert!(book.remove_last_content_page().is_none());
        assert_eq!(book.content_pages(), 1);
    }

    #[test]
    fn remove_takes_the_slot_before_closing() {
        let mut book = Book::new(3);
        book.set_image(3, "c").unwrap();
        book.set_image(4, "closing").unwrap();

        let (index, removed) = book.remove_last_content_page().unwrap();
        assert_eq!(index, 3);
        assert_eq!(removed.image_url.as_deref(), Some("c"));
        assert_eq!(urls(&book), vec![None, None, None, Some("closing")]);
    }

    #[test]
    fn new_pages_are_inserted_before_closing() {
        let mut book = Book::new(1);
        book.set_image(2, "closing").unwrap();
        book.add_page();
        assert_eq!(urls(&book), vec![None, None, None, Some("closing")]);
    }

    #[test]
    fn labels_follow_position_unless_renamed() {
        let mut book = Book::new(3);
        assert_eq!(
            book.labels(),
            vec!["Cover", "Page 1", "Page 2", "Page 3", "Closing"]
        );

        book.rename(0, "Front").unwrap();
        book.rename(4, "The End").unwrap();
        book.rename(2, "Class of 2024").unwrap();
        assert_eq!(book.label(0), "Front");
        assert_eq!(book.label(2), "Class of 2024");
        assert_eq!(book.label(4), "The End");

        book.rename(2, "   ").unwrap();
        assert_eq!(book.label(2), "Page 2");
    }

    #[test]
    fn reorder_moves_whole_slot_and_is_invertible() {
        let mut book = Book::new(3);
        for (idx, url) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            book.set_image(idx, *url).unwrap();
        }
        book.rename(1, "first").unwrap();
        let original = book.clone();

        assert!(book.reorder(1, 3).unwrap());
        assert_eq!(
            urls(&book),
            vec![Some("a"), Some("c"), Some("d"), Some("b"), Some("e")]
        );
        assert_eq!(book.label(3), "first");

        assert!(book.reorder(3, 1).unwrap());
        assert_eq!(book, original);
    }

    #[test]
    fn reorder_to_same_index_is_noop() {
        let mut book = Book::new(2);
        let before = book.clone();
        assert!(!book.reorder(2, 2).unwrap());
        assert_eq!(book, before);
        assert!(matches!(
            book.reorder(0, 9),
            Err(FlipbookError::PageOutOfRange { index: 9, len: 4 })
        ));
    }

    #[test]
    fn bulk_insert_fills_gaps_then_appends() {
        let mut book = Book::new(3);
        book.set_image(0, "cover").unwrap();
        book.set_image(2, "two").unwrap();
        // empty: 1, 3, 4
        let placed = book.bulk_insert(
            ["u1", "u2", "u3", "u4", "u5"]
                .iter()
                .map(|u| BulkItem::new(*u))
                .collect(),
        );

        assert_eq!(book.len(), 5 + (5 - 3));
        let positions: Vec<usize> = placed
            .iter()
            .map(|id| book.position_of(*id).unwrap())
            .collect();
        assert_eq!(positions, vec![1, 3, 6, 4, 5]);
        assert_eq!(
            urls(&book),
            vec![
                Some("cover"),
                Some("u1"),
                Some("two"),
                Some("u2"),
                Some("u4"),
                Some("u5"),
                Some("u3"),
            ]
        );
    }

    #[test]
    fn bulk_insert_names_pages_after_source_files() {
        let mut book = Book::new(1);
        book.bulk_insert(vec![
            BulkItem::new("x").with_source_name("photos/alice.smith.jpg"),
            BulkItem::new("y").with_source_name(".hidden"),
            BulkItem::new("z"),
        ]);
        assert_eq!(book.label(0), "alice.smith");
        assert_eq!(book.label(1), ".hidden");
        assert_eq!(book.label(2), "Closing");
    }

    #[test]
    fn records_only_include_slots_with_images() {
        let mut book = Book::new(2);
        book.set_image(1, "one").unwrap();
        book.rename(1, "Intro").unwrap();
        book.rename(2, "no image").unwrap();

        let records = book.records();
        assert_eq!(records.len(), 1);
        let record = &records[&1];
        assert_eq!(record.url, "one");
        assert_eq!(record.page_name.as_deref(), Some("Intro"));
    }

    #[test]
    fn overlays_travel_with_their_page() {
        let mut book = Book::new(2);
        book.add_overlay(1, TextOverlay::new("hello", 150.0, -2.0)).unwrap();
        let overlay = &book.slot(1).unwrap().overlays[0];
        assert_eq!((overlay.x, overlay.y), (100.0, 0.0));
        assert_eq!(TextOverlay::new("mid", 42.5, f32::NAN).x, 42.5);

        book.reorder(1, 2).unwrap();
        assert!(book.slot(1).unwrap().overlays.is_empty());
        assert_eq!(book.slot(2).unwrap().overlays.len(), 1);

        assert!(book.remove_overlay(2, 3).is_err());
        assert_eq!(book.remove_overlay(2, 0).unwrap().text, "hello");
    }
}
