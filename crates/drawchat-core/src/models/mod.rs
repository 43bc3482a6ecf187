//! Data models for drawchat

mod conversation;
mod diagram;
mod sync;

pub use conversation::{
    new_session_id, ConversationId, ConversationMeta, ConversationPayload, Message, MessageRole,
    ToolInvocation, DERIVED_TITLE_MAX_CHARS,
};
pub use diagram::{DiagramVersion, VersionLabel};
pub use sync::{
    ConversationPushItem, PullResponse, PushResponse, RemoteRecord, SyncConflict, SyncCursor,
    Tombstone,
};
