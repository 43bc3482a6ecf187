//! Diagram version history
//!
//! A linear undo stack of diagram snapshots stored inside a
//! [`ConversationPayload`]. Recording a new version after an undo abandons the
//! redo branch. Each user message can be associated with the version that was
//! on screen when it was sent, so regenerating or editing that message can put
//! the diagram back exactly as it was.
//!
//! Every mutation leaves `payload.xml == diagram_versions[cursor].xml`.

use crate::error::{Error, Result};
use crate::models::{ConversationPayload, DiagramVersion, VersionLabel};

/// Mutable view over a payload's diagram history.
pub struct DiagramHistory<'a> {
    payload: &'a mut ConversationPayload,
    max_versions: usize,
}

impl<'a> DiagramHistory<'a> {
    pub fn new(payload: &'a mut ConversationPayload, max_versions: usize) -> Self {
        Self {
            payload,
            max_versions: max_versions.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.diagram_versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.diagram_versions.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.payload.cursor_index()
    }

    pub fn current(&self) -> Option<&DiagramVersion> {
        self.cursor()
            .map(|index| &self.payload.diagram_versions[index])
    }

    pub fn can_undo(&self) -> bool {
        self.cursor().is_some_and(|cursor| cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor()
            .is_some_and(|cursor| cursor + 1 < self.len())
    }

    /// Push a version after the cursor, discarding anything after it.
    ///
    /// Returns the index of the new version.
    pub fn append_version(
        &mut self,
        xml: impl Into<String>,
        label: VersionLabel,
        now_ms: i64,
    ) -> usize {
        let keep = self.cursor().map_or(0, |cursor| cursor + 1);
        self.payload.diagram_versions.truncate(keep);
        self.payload
            .message_versions
            .retain(|_, version| *version < keep);

        self.payload
            .diagram_versions
            .push(DiagramVersion::new(xml, label, now_ms));
        self.set_cursor(Some(self.len() - 1));
        self.prune();

        self.len() - 1
    }

    /// Step back one version. No-op at the oldest version.
    pub fn undo(&mut self) -> Option<&DiagramVersion> {
        let cursor = self.cursor().filter(|cursor| *cursor > 0)?;
        self.set_cursor(Some(cursor - 1));
        self.current()
    }

    /// Step forward one version. No-op at the newest version.
    pub fn redo(&mut self) -> Option<&DiagramVersion> {
        let cursor = self
            .cursor()
            .filter(|cursor| cursor + 1 < self.len())?;
        self.set_cursor(Some(cursor + 1));
        self.current()
    }

    /// Associate `message_index` with the diagram state `xml`.
    ///
    /// An existing association wins. Otherwise the current version is reused
    /// when it already shows `xml`, and a new version is appended when not.
    pub fn ensure_version_for_message(
        &mut self,
        message_index: usize,
        xml: &str,
        label: VersionLabel,
        now_ms: i64,
    ) -> usize {
        if let Some(existing) = self.version_index_for_message(message_index) {
            return existing;
        }

        let index = match self.current() {
            Some(current) if current.xml == xml => self.cursor().unwrap_or_default(),
            _ => self.append_version(xml, label, now_ms),
        };
        self.payload.message_versions.insert(message_index, index);
        index
    }

    /// Version index recorded for exactly `message_index`.
    pub fn version_index_for_message(&self, message_index: usize) -> Option<usize> {
        self.payload
            .message_versions
            .get(&message_index)
            .copied()
            .filter(|index| *index < self.len())
    }

    /// Diagram xml recorded for exactly `message_index`.
    pub fn xml_for_message(&self, message_index: usize) -> Option<&str> {
        self.version_index_for_message(message_index)
            .map(|index| self.payload.diagram_versions[index].xml.as_str())
    }

    /// Like [`Self::xml_for_message`] but reports a missing snapshot as an error.
    pub fn require_xml_for_message(&self, message_index: usize) -> Result<&str> {
        self.xml_for_message(message_index)
            .ok_or(Error::NoSnapshot(message_index))
    }

    /// Xml of the latest version tied to a message strictly before
    /// `message_index`, or an empty string.
    pub fn previous_xml_before_message(&self, message_index: usize) -> String {
        self.payload
            .message_versions
            .range(..message_index)
            .rev()
            .find_map(|(_, index)| self.payload.diagram_versions.get(*index))
            .map(|version| version.xml.clone())
            .unwrap_or_default()
    }

    /// Move the cursor to the snapshot recorded for `message_index`.
    pub fn restore_message(&mut self, message_index: usize) -> Result<&DiagramVersion> {
        let index = self
            .version_index_for_message(message_index)
            .ok_or(Error::NoSnapshot(message_index))?;
        self.set_cursor(Some(index));
        Ok(&self.payload.diagram_versions[index])
    }

    /// Drop every version and association recorded after `message_index`.
    ///
    /// The cursor lands on the version of the latest association at or before
    /// `message_index`; with no such association the history is cleared.
    pub fn truncate_versions_after_message(&mut self, message_index: usize) {
        let anchor = self
            .payload
            .message_versions
            .range(..=message_index)
            .next_back()
            .map(|(_, index)| *index)
            .filter(|index| *index < self.len());

        match anchor {
            Some(anchor) => {
                self.payload.diagram_versions.truncate(anchor + 1);
                self.payload
                    .message_versions
                    .retain(|message, version| *message <= message_index && *version <= anchor);
                self.set_cursor(Some(anchor));
            }
            None => {
                self.payload.diagram_versions.clear();
                self.payload.message_versions.clear();
                self.set_cursor(None);
            }
        }
    }

    /// Keep at most `max_versions`, dropping the oldest.
    fn prune(&mut self) {
        let excess = self.len().saturating_sub(self.max_versions);
        if excess == 0 {
            return;
        }

        let cursor = self.cursor().map(|cursor| cursor.saturating_sub(excess));
        self.payload.diagram_versions.drain(..excess);
        self.payload.message_versions = std::mem::take(&mut self.payload.message_versions)
            .into_iter()
            .filter(|(_, version)| *version >= excess)
            .map(|(message, version)| (message, version - excess))
            .collect();
        self.set_cursor(cursor);
        tracing::debug!("Pruned {excess} diagram versions beyond cap {}", self.max_versions);
    }

    fn set_cursor(&mut self, cursor: Option<usize>) {
        let cursor = cursor.filter(|index| *index < self.len());
        self.payload.diagram_version_cursor =
            cursor.map_or(-1, |index| i64::try_from(index).unwrap_or(i64::MAX));
        self.payload.xml = cursor
            .map(|index| self.payload.diagram_versions[index].xml.clone())
            .unwrap_or_default();
    }
}
