//! In-memory editor host, used by the CLI and by tests.
//!
//! Documents are plain strings addressed in line/character coordinates
//! (characters are Unicode scalar values). Methods without the trait's
//! signature play the part of the user at the keyboard: they mutate a
//! document and report the change through the attached [`ChangeSink`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use liveshare_core::{DocumentKey, Position, TextRange};

use super::{ChangeSink, EditorHost, Notice, TextChange};
use crate::error::HostError;
use crate::presence::PresenceSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDocument {
    pub filename: String,
    pub content: String,
    pub language: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<DocumentKey, MemoryDocument>,
    sink: Option<ChangeSink>,
    active: Option<DocumentKey>,
    navigations: Vec<DocumentKey>,
    notices: Vec<Notice>,
    presence: Option<PresenceSnapshot>,
    presence_cleared: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<State>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route user activity to a client.
    pub fn attach(&self, sink: ChangeSink) {
        self.lock().sink = Some(sink);
    }

    /// A file that exists only locally until it is shared.
    pub fn open_local(&self, key: &DocumentKey, filename: &str, content: &str) {
        self.lock().documents.insert(
            key.clone(),
            MemoryDocument {
                filename: filename.to_string(),
                content: content.to_string(),
                language: None,
            },
        );
    }

    /// The user replaces `range` with `text`.
    pub fn type_text(&self, key: &DocumentKey, range: TextRange, text: &str) -> Result<(), HostError> {
        let (sink, change) = {
            let mut state = self.lock();
            let document = state
                .documents
                .get_mut(key)
                .ok_or_else(|| HostError::UnknownDocument(key.clone()))?;
            let replaced_len = splice(&mut document.content, range, text)
                .ok_or_else(|| HostError::RangeOutOfBounds(key.clone()))?;
            let change = TextChange {
                range,
                replaced_len,
                text: text.to_string(),
            };
            (state.sink.clone(), change)
        };
        if let Some(sink) = sink {
            sink.edited(key, vec![change]);
        }
        Ok(())
    }

    /// The user moves the caret.
    pub fn move_cursor(&self, key: &DocumentKey, cursor: Position, selection: Option<TextRange>) {
        let sink = self.lock().sink.clone();
        if let Some(sink) = sink {
            sink.selection_changed(key, cursor, selection);
        }
    }

    /// The user switches to another document.
    pub fn activate(&self, key: &DocumentKey) -> Result<(), HostError> {
        let (sink, document) = {
            let mut state = self.lock();
            let document = state
                .documents
                .get(key)
                .cloned()
                .ok_or_else(|| HostError::UnknownDocument(key.clone()))?;
            state.active = Some(key.clone());
            (state.sink.clone(), document)
        };
        if let Some(sink) = sink {
            sink.active_changed(
                key,
                &document.filename,
                &document.content,
                document.language.as_deref(),
            );
        }
        Ok(())
    }

    pub fn text(&self, key: &DocumentKey) -> Option<String> {
        self.lock().documents.get(key).map(|d| d.content.clone())
    }

    pub fn document(&self, key: &DocumentKey) -> Option<MemoryDocument> {
        self.lock().documents.get(key).cloned()
    }

    pub fn active(&self) -> Option<DocumentKey> {
        self.lock().active.clone()
    }

    /// Documents opened by follow-mode navigation, oldest first.
    pub fn navigations(&self) -> Vec<DocumentKey> {
        self.lock().navigations.clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.lock().notices.clone()
    }

    pub fn last_presence(&self) -> Option<PresenceSnapshot> {
        self.lock().presence.clone()
    }

    pub fn presence_cleared(&self) -> usize {
        self.lock().presence_cleared
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EditorHost for MemoryHost {
    async fn materialize(
        &self,
        key: &DocumentKey,
        filename: &str,
        content: &str,
        language: Option<&str>,
    ) -> Result<(), HostError> {
        let (sink, change) = {
            let mut state = self.lock();
            let previous = state.documents.insert(
                key.clone(),
                MemoryDocument {
                    filename: filename.to_string(),
                    content: content.to_string(),
                    language: language.map(str::to_string),
                },
            );
            let change = previous.map(|old| TextChange {
                range: TextRange::new(Position::default(), end_of(&old.content)),
                replaced_len: old.content.chars().count(),
                text: content.to_string(),
            });
            (state.sink.clone(), change)
        };
        // Overwriting looks like a whole-document edit to the editor.
        if let (Some(sink), Some(change)) = (sink, change) {
            sink.edited(key, vec![change]);
        }
        Ok(())
    }

    async fn apply_edit(&self, key: &DocumentKey, range: TextRange, text: &str) -> Result<(), HostError> {
        let (sink, change) = {
            let mut state = self.lock();
            let document = state
                .documents
                .get_mut(key)
                .ok_or_else(|| HostError::UnknownDocument(key.clone()))?;
            let replaced_len = splice(&mut document.content, range, text)
                .ok_or_else(|| HostError::RangeOutOfBounds(key.clone()))?;
            let change = TextChange {
                range,
                replaced_len,
                text: text.to_string(),
            };
            (state.sink.clone(), change)
        };
        if let Some(sink) = sink {
            sink.edited(key, vec![change]);
        }
        Ok(())
    }

    async fn close_document(&self, key: &DocumentKey) -> Result<(), HostError> {
        let mut state = self.lock();
        if state.active.as_ref() == Some(key) {
            state.active = None;
        }
        state
            .documents
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| HostError::UnknownDocument(key.clone()))
    }

    async fn open_document(&self, key: &DocumentKey) -> Result<(), HostError> {
        let (sink, document) = {
            let mut state = self.lock();
            let document = state
                .documents
                .get(key)
                .cloned()
                .ok_or_else(|| HostError::UnknownDocument(key.clone()))?;
            state.active = Some(key.clone());
            state.navigations.push(key.clone());
            (state.sink.clone(), document)
        };
        if let Some(sink) = sink {
            sink.active_changed(
                key,
                &document.filename,
                &document.content,
                document.language.as_deref(),
            );
        }
        Ok(())
    }

    fn render_presence(&self, snapshot: &PresenceSnapshot) {
        self.lock().presence = Some(snapshot.clone());
    }

    fn clear_presence(&self) {
        let mut state = self.lock();
        state.presence = None;
        state.presence_cleared += 1;
    }

    fn notify(&self, notice: &Notice) {
        log::info!("[notice] {:?}: {}", notice.level, notice.text);
        self.lock().notices.push(notice.clone());
    }
}

/// Byte offset of `pos` in `text`, or `None` if it is past the end of
/// its line or the document.
pub fn offset_of(text: &str, pos: Position) -> Option<usize> {
    let mut line_start = 0;
    for _ in 0..pos.line {
        line_start += text[line_start..].find('\n')? + 1;
    }
    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);
    let line = &text[line_start..line_end];
    let column = pos.character as usize;
    if column == line.chars().count() {
        return Some(line_end);
    }
    line.char_indices().nth(column).map(|(i, _)| line_start + i)
}

/// Replace `range` in `text`. Returns the number of characters replaced,
/// or `None` if the range is out of bounds or reversed.
pub fn splice(text: &mut String, range: TextRange, replacement: &str) -> Option<usize> {
    let start = offset_of(text, range.start)?;
    let end = offset_of(text, range.end)?;
    if start > end {
        return None;
    }
    let replaced = text[start..end].chars().count();
    text.replace_range(start..end, replacement);
    Some(replaced)
}

fn end_of(text: &str) -> Position {
    let line = text.matches('\n').count() as u32;
    let last = text.rsplit('\n').next().unwrap_or("");
    Position::new(line, last.chars().count() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EchoGuard, LocalEvent};
    use tokio::sync::mpsc;

    fn r(sl: u32, sc: u32, el: u32, ec: u32) -> TextRange {
        TextRange::new(Position::new(sl, sc), Position::new(el, ec))
    }

    #[test]
    fn test_splice_multiline() {
        let mut text = "print(1)\nprint(2)\n".to_string();
        assert_eq!(splice(&mut text, r(1, 6, 1, 7), "42"), Some(1));
        assert_eq!(text, "print(1)\nprint(42)\n");
        assert_eq!(splice(&mut text, r(0, 8, 1, 0), ""), Some(1));
        assert_eq!(text, "print(1)print(42)\n");
    }

    #[test]
    fn test_splice_counts_characters_not_bytes() {
        let mut text = "héllo".to_string();
        assert_eq!(splice(&mut text, r(0, 1, 0, 2), "e"), Some(1));
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_splice_out_of_bounds() {
        let mut text = "ab".to_string();
        assert_eq!(splice(&mut text, r(0, 0, 0, 3), "x"), None);
        assert_eq!(splice(&mut text, r(2, 0, 2, 0), "x"), None);
        assert_eq!(text, "ab");
    }

    #[test]
    fn test_splice_rejects_reversed_range() {
        let mut text = "hello world".to_string();
        let reversed = TextRange {
            start: Position::new(0, 4),
            end: Position::new(0, 1),
        };
        assert_eq!(splice(&mut text, reversed, ""), None);
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_end_of() {
        assert_eq!(end_of(""), Position::new(0, 0));
        assert_eq!(end_of("ab\ncd"), Position::new(1, 2));
        assert_eq!(end_of("ab\n"), Position::new(1, 0));
    }

    #[tokio::test]
    async fn test_apply_edit_reports_through_sink() {
        let host = MemoryHost::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = EchoGuard::new();
        host.attach(ChangeSink::new(tx, guard.clone()));
        let key = DocumentKey::new("file:///a.py");
        host.materialize(&key, "a.py", "", Some("python")).await.unwrap();

        {
            let _scope = guard.applying();
            host.apply_edit(&key, r(0, 0, 0, 0), "print(1)").await.unwrap();
        }
        assert!(rx.try_recv().is_err(), "remote edit must not echo");
        assert_eq!(host.text(&key).as_deref(), Some("print(1)"));

        host.type_text(&key, r(0, 6, 0, 7), "2").unwrap();
        match rx.try_recv().unwrap() {
            LocalEvent::Edited { changes, .. } => {
                assert_eq!(changes[0].replaced_len, 1);
                assert_eq!(changes[0].text, "2");
            }
            other => panic!("Expected Edited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_apply_edit_unknown_document() {
        let host = MemoryHost::new();
        let err = host
            .apply_edit(&DocumentKey::new("nope"), r(0, 0, 0, 0), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn test_open_document_records_navigation() {
        let host = MemoryHost::new();
        let key = DocumentKey::new("file:///b.py");
        host.open_local(&key, "b.py", "x");
        host.open_document(&key).await.unwrap();
        assert_eq!(host.navigations(), vec![key.clone()]);
        assert_eq!(host.active(), Some(key));
    }
}
