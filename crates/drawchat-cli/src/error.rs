use std::io;

use drawchat_core::sync::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] drawchat_core::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No message content provided")]
    EmptyContent,
    #[error("No diagram XML provided")]
    EmptyDiagram,
    #[error("Conversation ID cannot be empty")]
    EmptyConversationId,
    #[error("Conversation not found for id/prefix: {0}")]
    ConversationNotFound(String),
    #[error("{0}")]
    AmbiguousConversationId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync finished with errors: {0}")]
    SyncFailed(String),
    #[error(
        "Sync is not configured. Run `drawchat config init --endpoint <URL> --user-id <ID>` and set DRAWCHAT_ACCESS_TOKEN."
    )]
    SyncNotConfigured,
}
