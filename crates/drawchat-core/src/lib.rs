//! drawchat-core - Core library for drawchat
//!
//! This crate contains the conversation models, the local conversation store,
//! the cache quota manager, diagram version history, the sync engine and the
//! tool-call retry controller shared by every drawchat client.

pub mod canvas;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod history;
pub mod models;
pub mod quota;
pub mod retry;
pub mod services;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{ConversationId, ConversationMeta, ConversationPayload};
