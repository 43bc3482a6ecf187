pub mod cache;
pub mod common;
pub mod completions;
pub mod config;
pub mod delete;
pub mod export;
pub mod history;
pub mod list;
pub mod message;
pub mod migrate;
pub mod new;
pub mod rename;
pub mod show;
pub mod sync;
