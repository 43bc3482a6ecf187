//! Database layer for drawchat

mod connection;
mod kv;
mod migrations;

pub use connection::Database;
pub use kv::{KeyValueStore, SqliteKeyValueStore};
