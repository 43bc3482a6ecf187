//! Storage key layout.

use crate::models::ConversationId;

pub const METAS: &str = "conversations.metas";
pub const CURRENT: &str = "conversations.current";
pub const PAYLOAD_PREFIX: &str = "conversation.payload:";
pub const TOMBSTONES: &str = "sync.tombstones";
pub const PENDING_PUSHES: &str = "sync.pending";
pub const EVICTED: &str = "cache.evicted";
pub const REMOTE_KNOWN_PREFIX: &str = "sync.remote_known:";

pub const LEGACY_MESSAGES: &str = "legacy.messages";
pub const LEGACY_XML: &str = "legacy.xml";
pub const LEGACY_DIAGRAM_VERSIONS: &str = "legacy.diagram_versions";
pub const LEGACY_DIAGRAM_CURSOR: &str = "legacy.diagram_version_cursor";
pub const LEGACY_SESSION_ID: &str = "legacy.session_id";

pub const LEGACY_KEYS: [&str; 5] = [
    LEGACY_MESSAGES,
    LEGACY_XML,
    LEGACY_DIAGRAM_VERSIONS,
    LEGACY_DIAGRAM_CURSOR,
    LEGACY_SESSION_ID,
];

pub fn payload(id: &ConversationId) -> String {
    format!("{PAYLOAD_PREFIX}{id}")
}

pub fn cursor(user_id: &str) -> String {
    format!("sync.cursor:{user_id}")
}

pub fn remote_known(user_id: &str) -> String {
    format!("{REMOTE_KNOWN_PREFIX}{user_id}")
}
