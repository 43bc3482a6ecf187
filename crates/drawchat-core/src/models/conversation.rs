//! Conversation model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::diagram::DiagramVersion;
use crate::util::truncate_with_ellipsis;

/// Maximum characters of the first user message used as a fallback title.
pub const DERIVED_TITLE_MAX_CHARS: usize = 50;

/// A unique identifier for a conversation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Create a new unique conversation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Listing entry for a conversation.
///
/// `updated_at` is the conflict-resolution authority and is bumped on every
/// payload mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    /// Unique identifier
    pub id: ConversationId,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Optional user-provided title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ConversationMeta {
    #[must_use]
    pub const fn new(id: ConversationId, now_ms: i64) -> Self {
        Self {
            id,
            created_at: now_ms,
            updated_at: now_ms,
            title: None,
        }
    }

    /// Title to show in listings, falling back to the first user message.
    #[must_use]
    pub fn display_title(&self, payload: Option<&ConversationPayload>) -> String {
        if let Some(title) = self.title.as_deref().map(str::trim) {
            if !title.is_empty() {
                return title.to_string();
            }
        }
        payload
            .and_then(ConversationPayload::derived_title)
            .unwrap_or_else(|| "New chat".to_string())
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Outcome of a single tool invocation attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Tool name, e.g. `edit_diagram`
    pub name: String,
    /// Error text reported by the tool, if it failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocation {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Some(error.into()),
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Creation timestamp (Unix ms)
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            content: content.into(),
            created_at: now_ms,
            tool_invocations: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>, now_ms: i64) -> Self {
        Self::new(MessageRole::User, content, now_ms)
    }

    pub fn assistant(content: impl Into<String>, now_ms: i64) -> Self {
        Self::new(MessageRole::Assistant, content, now_ms)
    }

    #[must_use]
    pub fn with_tool_invocation(mut self, invocation: ToolInvocation) -> Self {
        self.tool_invocations.push(invocation);
        self
    }
}

/// Full mutable content of a conversation.
///
/// `xml` always mirrors `diagram_versions[diagram_version_cursor]`; the cursor
/// is `-1` only while the version list is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub xml: String,
    #[serde(default)]
    pub diagram_versions: Vec<DiagramVersion>,
    #[serde(default = "empty_cursor")]
    pub diagram_version_cursor: i64,
    #[serde(default)]
    pub session_id: String,
    /// Message index -> diagram version index snapshot taken for that message
    #[serde(default)]
    pub message_versions: BTreeMap<usize, usize>,
}

const fn empty_cursor() -> i64 {
    -1
}

impl Default for ConversationPayload {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            xml: String::new(),
            diagram_versions: Vec::new(),
            diagram_version_cursor: empty_cursor(),
            session_id: new_session_id(),
            message_versions: BTreeMap::new(),
        }
    }
}

impl ConversationPayload {
    /// Cursor as an index, `None` for an empty history.
    #[must_use]
    pub fn cursor_index(&self) -> Option<usize> {
        usize::try_from(self.diagram_version_cursor)
            .ok()
            .filter(|index| *index < self.diagram_versions.len())
    }

    /// Whether there is anything worth persisting remotely.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.messages.is_empty() || !self.diagram_versions.is_empty() || !self.xml.is_empty()
    }

    /// First user message, collapsed and truncated, used as a fallback title.
    #[must_use]
    pub fn derived_title(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.trim())
            .filter(|content| !content.is_empty())
            .map(|content| truncate_with_ellipsis(content, DERIVED_TITLE_MAX_CHARS))
    }

    /// Check the cursor/xml lockstep invariant.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.diagram_versions.is_empty() {
            return self.diagram_version_cursor == -1;
        }
        self.cursor_index()
            .is_some_and(|index| self.diagram_versions[index].xml == self.xml)
    }
}

/// Generate a fresh chat session identifier.
#[must_use]
pub fn new_session_id() -> String {
    format!("session-{}", Uuid::now_v7().simple())
}
