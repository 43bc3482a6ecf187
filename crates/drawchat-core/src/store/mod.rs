//! Local conversation store
//!
//! Durable key-value persistence of conversation metadata and payloads. All
//! operations are synchronous and never touch the network. Every write goes
//! through [`KeyValueStore::set_many`], so a payload either lands together
//! with its meta or the previous state stays readable.

mod keys;
mod legacy;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::db::{Database, KeyValueStore, SqliteKeyValueStore};
use crate::error::Result;
use crate::models::{
    ConversationId, ConversationMeta, ConversationPayload, SyncConflict, SyncCursor, Tombstone,
};

pub use legacy::{migrate_legacy_if_present, MigrationResult};

/// Conversation-keyed view over the local key-value database.
pub struct ConversationStore {
    db: Database,
    max_bytes: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl ConversationStore {
    pub fn new(db: Database, max_bytes: Option<u64>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            max_bytes,
            clock,
        }
    }

    /// Open a file-backed store.
    pub fn open(
        path: impl AsRef<Path>,
        max_bytes: Option<u64>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::new(Database::open(path)?, max_bytes, clock))
    }

    /// Open an unbounded in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(
            Database::open_in_memory()?,
            None,
            Arc::new(SystemClock),
        ))
    }

    /// Open an in-memory store with an explicit quota and clock.
    pub fn open_in_memory_with(max_bytes: Option<u64>, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?, max_bytes, clock))
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn kv(&self) -> SqliteKeyValueStore<'_> {
        SqliteKeyValueStore::new(self.db.connection(), self.max_bytes, self.clock.now_ms())
    }

    /// Read and decode a JSON value, treating malformed data as absent.
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.kv().get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                tracing::warn!("Ignoring malformed JSON stored under {key}: {error}");
                Ok(None)
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv().set(key, &raw)
    }

    // ---------------------------------------------------------------------
    // Metas and payloads
    // ---------------------------------------------------------------------

    /// All conversation metas in stored order.
    pub fn read_metas(&self) -> Result<Vec<ConversationMeta>> {
        Ok(self.read_json(keys::METAS)?.unwrap_or_default())
    }

    /// Replace the whole meta list.
    pub fn write_metas(&self, metas: &[ConversationMeta]) -> Result<()> {
        self.write_json(keys::METAS, metas)
    }

    pub fn read_meta(&self, id: &ConversationId) -> Result<Option<ConversationMeta>> {
        Ok(self
            .read_metas()?
            .into_iter()
            .find(|meta| &meta.id == id))
    }

    /// Payload for a conversation; malformed payloads read as `None`.
    pub fn read_payload(&self, id: &ConversationId) -> Result<Option<ConversationPayload>> {
        self.read_json(&keys::payload(id))
    }

    pub fn write_payload(&self, id: &ConversationId, payload: &ConversationPayload) -> Result<()> {
        self.write_json(&keys::payload(id), payload)
    }

    /// Persist a payload and its meta in one atomic write.
    ///
    /// The meta list is re-sorted by `updated_at` descending. A stored payload
    /// also clears any eviction marker for the conversation.
    pub fn write_conversation(
        &self,
        meta: &ConversationMeta,
        payload: &ConversationPayload,
    ) -> Result<()> {
        let mut metas = self.read_metas()?;
        upsert_sorted(&mut metas, meta.clone());

        let metas_raw = serde_json::to_string(&metas)?;
        let payload_raw = serde_json::to_string(payload)?;
        let payload_key = keys::payload(&meta.id);
        let mut evicted = self.read_evicted()?;
        let evicted_raw = if evicted.remove(&meta.id) {
            Some(serde_json::to_string(&evicted)?)
        } else {
            None
        };

        let mut entries = vec![
            (payload_key.as_str(), payload_raw.as_str()),
            (keys::METAS, metas_raw.as_str()),
        ];
        if let Some(raw) = &evicted_raw {
            entries.push((keys::EVICTED, raw.as_str()));
        }
        self.kv().set_many(&entries)
    }

    pub fn remove_meta(&self, id: &ConversationId) -> Result<bool> {
        let mut metas = self.read_metas()?;
        let before = metas.len();
        metas.retain(|meta| &meta.id != id);
        if metas.len() == before {
            return Ok(false);
        }
        self.write_metas(&metas)?;
        Ok(true)
    }

    pub fn remove_payload(&self, id: &ConversationId) -> Result<bool> {
        self.kv().remove(&keys::payload(id))
    }

    /// Ids that currently have a stored payload.
    pub fn payload_ids(&self) -> Result<BTreeSet<ConversationId>> {
        let ids = self
            .kv()
            .keys_with_prefix(keys::PAYLOAD_PREFIX)?
            .into_iter()
            .filter_map(|key| key[keys::PAYLOAD_PREFIX.len()..].parse().ok())
            .collect();
        Ok(ids)
    }

    // ---------------------------------------------------------------------
    // Pointers and sync bookkeeping
    // ---------------------------------------------------------------------

    pub fn current_conversation(&self) -> Result<Option<ConversationId>> {
        Ok(self
            .kv()
            .get(keys::CURRENT)?
            .and_then(|raw| raw.parse().ok()))
    }

    pub fn set_current_conversation(&self, id: Option<&ConversationId>) -> Result<()> {
        match id {
            Some(id) => self.kv().set(keys::CURRENT, &id.to_string()),
            None => self.kv().remove(keys::CURRENT).map(|_| ()),
        }
    }

    pub fn read_cursor(&self, user_id: &str) -> Result<Option<SyncCursor>> {
        Ok(self.kv().get(&keys::cursor(user_id))?.map(SyncCursor::new))
    }

    pub fn write_cursor(&self, user_id: &str, cursor: &SyncCursor) -> Result<()> {
        self.kv().set(&keys::cursor(user_id), cursor.as_str())
    }

    pub fn read_tombstones(&self) -> Result<Vec<Tombstone>> {
        Ok(self.read_json(keys::TOMBSTONES)?.unwrap_or_default())
    }

    pub fn add_tombstone(&self, tombstone: Tombstone) -> Result<()> {
        let mut tombstones = self.read_tombstones()?;
        tombstones.retain(|existing| existing.id != tombstone.id);
        tombstones.push(tombstone);
        self.write_json(keys::TOMBSTONES, &tombstones)
    }

    pub fn remove_tombstone(&self, id: &ConversationId) -> Result<()> {
        let mut tombstones = self.read_tombstones()?;
        let before = tombstones.len();
        tombstones.retain(|existing| &existing.id != id);
        if tombstones.len() != before {
            self.write_json(keys::TOMBSTONES, &tombstones)?;
        }
        Ok(())
    }

    /// Conversations with local changes not yet acknowledged by the remote.
    pub fn read_pending_pushes(&self) -> Result<BTreeSet<ConversationId>> {
        Ok(self.read_json(keys::PENDING_PUSHES)?.unwrap_or_default())
    }

    pub fn mark_pending_push(&self, id: &ConversationId) -> Result<()> {
        let mut pending = self.read_pending_pushes()?;
        if pending.insert(*id) {
            self.write_json(keys::PENDING_PUSHES, &pending)?;
        }
        Ok(())
    }

    pub fn clear_pending_push(&self, id: &ConversationId) -> Result<()> {
        let mut pending = self.read_pending_pushes()?;
        if pending.remove(id) {
            self.write_json(keys::PENDING_PUSHES, &pending)?;
        }
        Ok(())
    }

    /// Conversations known to have a copy in the remote store for `user_id`.
    pub fn read_remote_known(&self, user_id: &str) -> Result<BTreeSet<ConversationId>> {
        Ok(self
            .read_json(&keys::remote_known(user_id))?
            .unwrap_or_default())
    }

    pub fn set_remote_known(&self, user_id: &str, id: &ConversationId, known: bool) -> Result<()> {
        let mut ids = self.read_remote_known(user_id)?;
        let changed = if known { ids.insert(*id) } else { ids.remove(id) };
        if changed {
            self.write_json(&keys::remote_known(user_id), &ids)?;
        }
        Ok(())
    }

    /// Conversations known to the remote under any account other than `user_id`.
    pub fn read_remote_known_elsewhere(&self, user_id: &str) -> Result<BTreeSet<ConversationId>> {
        let own_key = keys::remote_known(user_id);
        let mut ids = BTreeSet::new();
        for key in self.kv().keys_with_prefix(keys::REMOTE_KNOWN_PREFIX)? {
            if key != own_key {
                let known: Option<BTreeSet<ConversationId>> = self.read_json(&key)?;
                ids.extend(known.unwrap_or_default());
            }
        }
        Ok(ids)
    }

    /// Forget the pull position so the next pull starts from the beginning.
    pub fn clear_cursor(&self, user_id: &str) -> Result<()> {
        self.kv().remove(&keys::cursor(user_id)).map(|_| ())
    }

    // ---------------------------------------------------------------------
    // Eviction markers
    // ---------------------------------------------------------------------

    /// Conversations whose payload was evicted while the meta was kept.
    pub fn read_evicted(&self) -> Result<BTreeSet<ConversationId>> {
        Ok(self.read_json(keys::EVICTED)?.unwrap_or_default())
    }

    pub fn is_evicted(&self, id: &ConversationId) -> Result<bool> {
        Ok(self.read_evicted()?.contains(id))
    }

    pub fn mark_evicted(&self, ids: &BTreeSet<ConversationId>) -> Result<()> {
        let mut evicted = self.read_evicted()?;
        let before = evicted.len();
        evicted.extend(ids.iter().copied());
        if evicted.len() != before {
            self.write_json(keys::EVICTED, &evicted)?;
        }
        Ok(())
    }

    pub fn clear_evicted(&self, id: &ConversationId) -> Result<()> {
        let mut evicted = self.read_evicted()?;
        if evicted.remove(id) {
            self.write_json(keys::EVICTED, &evicted)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Conflict log
    // ---------------------------------------------------------------------

    pub fn record_conflict(
        &self,
        id: &ConversationId,
        local_updated_at: i64,
        incoming_updated_at: i64,
    ) -> Result<()> {
        self.db.connection().execute(
            "INSERT INTO sync_conflicts (conversation_id, local_updated_at, incoming_updated_at, resolved_at, strategy)
             VALUES (?, ?, ?, ?, 'lww')",
            params![
                id.as_str(),
                local_updated_at,
                incoming_updated_at,
                self.clock.now_ms()
            ],
        )?;
        Ok(())
    }

    /// Most recently resolved conflicts first.
    pub fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT id, conversation_id, local_updated_at, incoming_updated_at, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(SyncConflict {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    local_updated_at: row.get(2)?,
                    incoming_updated_at: row.get(3)?,
                    resolved_at: row.get(4)?,
                    strategy: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    pub(crate) fn raw_get(&self, key: &str) -> Result<Option<String>> {
        self.kv().get(key)
    }

    pub(crate) fn raw_remove(&self, key: &str) -> Result<bool> {
        self.kv().remove(key)
    }
}

/// Replace or insert `meta`, then order by `updated_at` descending.
pub fn upsert_sorted(metas: &mut Vec<ConversationMeta>, meta: ConversationMeta) {
    metas.retain(|existing| existing.id != meta.id);
    metas.push(meta);
    sort_metas(metas);
}

/// Newest first; ties broken by id for a stable order.
pub fn sort_metas(metas: &mut [ConversationMeta]) {
    metas.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
