//! Key-value repository implementation

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite uses i64 for sizes

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Trait for durable key-value storage operations
pub trait KeyValueStore {
    /// Read a value by key
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a single value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several values atomically: all land or none do
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

    /// Remove a value, returning whether it existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// List keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Bytes currently used by keys and values
    fn used_bytes(&self) -> Result<u64>;
}

/// `SQLite` implementation of `KeyValueStore` with an optional byte quota
pub struct SqliteKeyValueStore<'a> {
    conn: &'a Connection,
    max_bytes: Option<u64>,
    now_ms: i64,
}

impl<'a> SqliteKeyValueStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection, max_bytes: Option<u64>, now_ms: i64) -> Self {
        Self {
            conn,
            max_bytes,
            now_ms,
        }
    }

    fn entry_bytes(key: &str, value: &str) -> u64 {
        (key.len() + value.len()) as u64
    }

    fn existing_bytes(&self, key: &str) -> Result<u64> {
        let size: Option<i64> = self
            .conn
            .query_row(
                "SELECT LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB)) FROM kv WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(size.unwrap_or(0).max(0) as u64)
    }

    /// Reject the write when it would push usage past the quota.
    fn check_quota(&self, entries: &[(&str, &str)]) -> Result<()> {
        let Some(max_bytes) = self.max_bytes else {
            return Ok(());
        };

        let mut released = 0u64;
        let mut needed = 0u64;
        for (key, value) in entries {
            released += self.existing_bytes(key)?;
            needed += Self::entry_bytes(key, value);
        }

        let used = self.used_bytes()?.saturating_sub(released);
        let available = max_bytes.saturating_sub(used);
        if needed > available {
            return Err(Error::QuotaExceeded { needed, available });
        }
        Ok(())
    }
}

impl KeyValueStore for SqliteKeyValueStore<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        self.check_quota(entries)?;

        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, self.now_ms],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(rows > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, ?1) = ?2 ORDER BY key")?;

        let keys = stmt
            .query_map(params![prefix.len() as i64, prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(keys)
    }

    fn used_bytes(&self) -> Result<u64> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) FROM kv",
            [],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let db = setup();
        let kv = SqliteKeyValueStore::new(db.connection(), None, 1);

        kv.set("alpha", "1").unwrap();
        kv.set("alpha", "2").unwrap();

        assert_eq!(kv.get("alpha").unwrap().as_deref(), Some("2"));
        assert!(kv.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_keys_with_prefix_is_literal() {
        let db = setup();
        let kv = SqliteKeyValueStore::new(db.connection(), None, 1);

        kv.set("payload:a", "{}").unwrap();
        kv.set("payload:b", "{}").unwrap();
        kv.set("payload_x", "{}").unwrap();
        kv.set("metas", "[]").unwrap();

        assert_eq!(
            kv.keys_with_prefix("payload:").unwrap(),
            vec!["payload:a".to_string(), "payload:b".to_string()]
        );
    }

    #[test]
    fn test_remove_reports_existence() {
        let db = setup();
        let kv = SqliteKeyValueStore::new(db.connection(), None, 1);

        kv.set("k", "v").unwrap();
        assert!(kv.remove("k").unwrap());
        assert!(!kv.remove("k").unwrap());
    }

    #[test]
    fn test_quota_rejects_write_and_keeps_previous_value() {
        let db = setup();
        let kv = SqliteKeyValueStore::new(db.connection(), Some(20), 1);

        kv.set("k", "small").unwrap();
        let error = kv.set("k", &"x".repeat(64)).unwrap_err();
        assert!(error.is_quota_exceeded());
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn test_quota_counts_replaced_value_as_released() {
        let db = setup();
        let kv = SqliteKeyValueStore::new(db.connection(), Some(12), 1);

        kv.set("k", "0123456789").unwrap();
        // Replacing with an equally sized value fits even though usage is at 11/12
        kv.set("k", "9876543210").unwrap();
        assert_eq!(kv.used_bytes().unwrap(), 11);
    }

    #[test]
    fn test_set_many_is_all_or_nothing() {
        let db = setup();
        let kv = SqliteKeyValueStore::new(db.connection(), Some(16), 1);

        let error = kv
            .set_many(&[("a", "1234"), ("b", "123456789012345")])
            .unwrap_err();
        assert!(error.is_quota_exceeded());
        assert!(kv.get("a").unwrap().is_none());
        assert!(kv.get("b").unwrap().is_none());
    }
}
