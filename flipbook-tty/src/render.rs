use flipbook_core::{Book, Editor, EditorState, PageSlot, Viewer, ViewerError};

pub fn format_page_line(index: usize, slot: &PageSlot, label: &str, selected: bool) -> String {
    let image = if slot.has_image() { "[x]" } else { "[ ]" };
    let mut line = format!("{} {:02} {}", image, index, label);
    if !slot.overlays.is_empty() {
        line.push_str(&format!(" ({} text)", slot.overlays.len()));
    }
    if selected {
        line.push_str(" <");
    }
    line
}

/// One line per slot, cover first.
pub fn render_page_strip(book: &Book, selected: usize, width: usize) -> Vec<String> {
    book.slots()
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            let line = format_page_line(index, slot, &book.label(index), index == selected);
            truncate_with_ellipsis(line, width)
        })
        .collect()
}

fn state_name(state: EditorState) -> &'static str {
    match state {
        EditorState::Loading => "loading",
        EditorState::Ready => "ready",
        EditorState::Saving => "saving",
        EditorState::Uploading => "uploading",
    }
}

pub fn format_editor_status(editor: &Editor) -> String {
    let book = editor.book();
    let selected = editor.selected();
    let mut status = format!(
        "{} ({}/{}) - {}",
        book.label(selected),
        selected + 1,
        book.len(),
        state_name(editor.state())
    );
    let pending = editor.pending_writes().len();
    if pending > 0 {
        status.push_str(&format!(" - {} pending", pending));
    }
    if editor.is_dirty() {
        status.push_str(" - unsaved");
    } else if let Some(saved) = editor.last_saved() {
        status.push_str(&format!(" - saved {}", saved.format("%H:%M:%S")));
    }
    status
}

pub fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

pub fn render_viewer_page(viewer: &Viewer) -> Vec<String> {
    if viewer.is_locked() {
        return vec![ViewerError::Locked.to_string()];
    }
    let mut lines = Vec::new();
    if let Some(title) = viewer.title() {
        lines.push(title.to_string());
    }
    let current = viewer.current();
    lines.push(format!(
        "{} ({}/{})",
        viewer.label(current),
        current + 1,
        viewer.len()
    ));
    match viewer.current_page() {
        Ok(page) => {
            match page.url.as_deref() {
                Some(url) => lines.push(format!("image: {}", url)),
                None => lines.push("image: (empty page)".to_string()),
            }
            for overlay in &page.text_overlays {
                lines.push(format!(
                    "text: {:?} at {:.0}%, {:.0}%",
                    overlay.text, overlay.x, overlay.y
                ));
            }
        }
        Err(err) => lines.push(err.to_string()),
    }
    if viewer.download_allowed() {
        lines.push("downloads allowed".to_string());
    }
    lines
}

pub fn truncate_with_ellipsis(text: String, width: usize) -> String {
    if text.chars().count() <= width {
        return text;
    }
    if width <= 3 {
        return text.chars().take(width).collect();
    }
    let mut truncated: String = text.chars().take(width - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use flipbook_core::{
        Command, Config, ImageUploader, MemoryProjectStore, MemoryRecordStore, PageRecord,
        ProjectSettings, ProjectSnapshot, TextOverlay, UploadError, UploadFile, ViewerOptions,
    };

    struct NoUploads;

    #[async_trait]
    impl ImageUploader for NoUploads {
        async fn upload(&self, _file: &UploadFile) -> Result<String, UploadError> {
            Err(UploadError::Rejected("offline".into()))
        }
    }

    #[test]
    fn page_strip_marks_images_overlays_and_selection() {
        let mut book = Book::new(3);
        book.set_image(1, "https://img/1.jpg").unwrap();
        book.rename(2, "Clubs").unwrap();
        book.add_overlay(1, TextOverlay::new("Go team", 50.0, 90.0))
            .unwrap();

        let strip = render_page_strip(&book, 1, 40);
        insta::assert_snapshot!(strip.join("\n"), @r"
        [ ] 00 Cover
        [x] 01 Page 1 (1 text) <
        [ ] 02 Clubs
        [ ] 03 Page 3
        [ ] 04 Closing
        ");
    }

    #[test]
    fn page_strip_truncates_long_labels() {
        let mut book = Book::new(1);
        book.rename(1, "A very long custom page name").unwrap();
        let strip = render_page_strip(&book, 0, 20);
        assert_eq!(strip[1], "[ ] 01 A very lon...");
        assert_eq!(strip[0], "[ ] 00 Cover <");
    }

    #[test]
    fn truncation_handles_tiny_widths() {
        assert_eq!(truncate_with_ellipsis("abcdef".into(), 5), "ab...");
        assert_eq!(truncate_with_ellipsis("abcdef".into(), 2), "ab");
        assert_eq!(truncate_with_ellipsis("abc".into(), 10), "abc");
    }

    #[test]
    fn combine_status_joins_pending_input() {
        assert_eq!(
            combine_status(Some("Cover (1/5) - ready".into()), Some("12")).as_deref(),
            Some("Cover (1/5) - ready | 12")
        );
        assert_eq!(combine_status(None, Some("")), None);
    }

    #[tokio::test]
    async fn editor_status_reports_pending_and_unsaved() {
        let mut editor = Editor::new(
            &Config::default(),
            Arc::new(MemoryRecordStore::new()),
            Arc::new(NoUploads),
        );
        editor.load().await;
        insta::assert_snapshot!(format_editor_status(&editor), @"Cover (1/5) - ready");

        editor
            .apply(Command::SetImage {
                index: 1,
                url: "u".into(),
            })
            .unwrap();
        editor.apply(Command::SelectPage { index: 1 }).unwrap();
        insta::assert_snapshot!(
            format_editor_status(&editor),
            @"Page 1 (2/5) - ready - 1 pending - unsaved"
        );
    }

    #[test]
    fn viewer_page_lists_image_and_blank_pages() {
        let mut viewer = Viewer::from_records(
            &[
                PageRecord {
                    page_index: 0,
                    url: "https://img/cover.jpg".into(),
                    page_name: None,
                },
                PageRecord {
                    page_index: 2,
                    url: "https://img/2.jpg".into(),
                    page_name: Some("Clubs".into()),
                },
            ],
            64,
        )
        .unwrap();

        insta::assert_snapshot!(render_viewer_page(&viewer).join("\n"), @r"
        Cover (1/3)
        image: https://img/cover.jpg
        ");

        viewer.next();
        insta::assert_snapshot!(render_viewer_page(&viewer).join("\n"), @r"
        Page 1 (2/3)
        image: (empty page)
        ");
    }

    #[tokio::test]
    async fn viewer_page_places_overlays_by_percent() {
        let mut book = Book::new(1);
        book.set_image(0, "https://img/cover.jpg").unwrap();
        book.add_overlay(0, TextOverlay::new("Class of 2024", 50.0, 90.0))
            .unwrap();
        let store = MemoryProjectStore::new();
        store.insert(
            "abc",
            ProjectSnapshot::from_book(&book, ProjectSettings::default(), None),
        );

        let viewer = Viewer::open(&store, "abc", ViewerOptions { analytics: false })
            .await
            .unwrap();
        insta::assert_snapshot!(render_viewer_page(&viewer).join("\n"), @r#"
        Cover (1/3)
        image: https://img/cover.jpg
        text: "Class of 2024" at 50%, 90%
        "#);
    }
}
