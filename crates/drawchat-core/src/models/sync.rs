//! Wire and bookkeeping types for remote sync

use std::fmt;

use serde::{Deserialize, Serialize};

use super::conversation::{ConversationId, ConversationMeta, ConversationPayload};

/// Opaque server-issued watermark bounding incremental pulls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One conversation sent to the remote store.
///
/// Tombstones carry `deleted = true` and no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPushItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ConversationPayload>,
}

impl ConversationPushItem {
    #[must_use]
    pub fn content(meta: &ConversationMeta, payload: ConversationPayload) -> Self {
        Self {
            id: meta.id.to_string(),
            title: meta.title.clone(),
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            deleted: false,
            payload: Some(payload),
        }
    }

    #[must_use]
    pub fn tombstone(tombstone: &Tombstone) -> Self {
        Self {
            id: tombstone.id.to_string(),
            title: None,
            created_at: tombstone.created_at,
            updated_at: tombstone.deleted_at,
            deleted: true,
            payload: None,
        }
    }

    /// Non-deleted pushes without a payload are skipped client-side.
    #[must_use]
    pub const fn is_pushable(&self) -> bool {
        self.deleted || self.payload.is_some()
    }
}

/// Record returned by the remote store on pull.
///
/// The payload is kept as raw JSON so one corrupt record does not poison
/// the whole page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub cursor: SyncCursor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub conversations: Vec<RemoteRecord>,
    pub cursor: SyncCursor,
}

/// Locally queued deletion awaiting a tombstone push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: ConversationId,
    pub created_at: i64,
    pub deleted_at: i64,
}

/// Remote record rejected by last-write-wins resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Conversation involved in the conflict
    pub conversation_id: String,
    /// Local timestamp that won
    pub local_updated_at: i64,
    /// Incoming timestamp that was rejected
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
