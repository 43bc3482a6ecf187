//! Conversation service shared by every client.
//!
//! Wraps a [`ConversationStore`] behind an async mutex and layers the
//! conversation lifecycle on top of it: every mutation bumps `updated_at`,
//! is persisted through the cache quota manager, and is announced to the sync
//! runner when one is attached.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::canvas::DiagramCanvas;
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::export::{render_conversations_export, ExportFormat};
use crate::history::DiagramHistory;
use crate::models::{
    ConversationId, ConversationMeta, ConversationPayload, DiagramVersion, Message, SyncConflict,
    Tombstone, VersionLabel,
};
use crate::quota::{CacheQuotaManager, CacheStats, CleanupReport};
use crate::store::{migrate_legacy_if_present, ConversationStore, MigrationResult};
use crate::sync::{AuthStatus, SyncSignal};
use crate::util::normalize_text_option;
use crate::{Error, Result};

/// Listing entry for a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub meta: ConversationMeta,
    pub title: String,
    pub message_count: usize,
    /// Whether the payload is stored locally (evicted entries keep only meta)
    pub cached: bool,
}

/// Result of deleting a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: ConversationId,
    /// Conversation that is current after the deletion
    pub current: ConversationId,
    /// Whether `current` was created because nothing else was left
    pub synthesized: bool,
}

/// Thread-safe service for conversation operations.
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<Mutex<ConversationStore>>,
    config: Arc<StoreConfig>,
    quota: CacheQuotaManager,
    auth: Arc<Mutex<AuthStatus>>,
    signals: Option<mpsc::UnboundedSender<SyncSignal>>,
}

impl ConversationService {
    /// Open a conversation service at the given filesystem path.
    ///
    /// Legacy single-chat data found in the file is imported on open.
    pub fn open_path(
        db_path: impl Into<PathBuf>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self::open_store(&db_path, config.storage_max_bytes, clock)?;
        match migrate_legacy_if_present(&store)? {
            MigrationResult::NotNeeded => {}
            result => tracing::info!("Legacy import at {}: {result:?}", db_path.display()),
        }
        Ok(Self::from_store(store, config))
    }

    /// Open an in-memory conversation service (primarily for tests).
    pub fn open_in_memory(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = ConversationStore::open_in_memory_with(config.storage_max_bytes, clock)?;
        Ok(Self::from_store(store, config))
    }

    pub fn from_store(store: ConversationStore, config: StoreConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            quota: CacheQuotaManager::new(config.quota),
            config: Arc::new(config),
            auth: Arc::new(Mutex::new(AuthStatus::default())),
            signals: None,
        }
    }

    /// Announce local changes on `sender` so a sync runner can push them.
    #[must_use]
    pub fn with_sync_signals(mut self, sender: mpsc::UnboundedSender<SyncSignal>) -> Self {
        self.signals = Some(sender);
        self
    }

    /// Shared handle to the store, for wiring up a sync engine.
    pub fn store_handle(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn open_store(
        db_path: &Path,
        max_bytes: Option<u64>,
        clock: Arc<dyn Clock>,
    ) -> Result<ConversationStore> {
        match ConversationStore::open(db_path, max_bytes, Arc::clone(&clock)) {
            Ok(store) => Ok(store),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable ({error}); moving it aside and starting fresh",
                    db_path.display()
                );
                Self::quarantine_corrupted_db_files(db_path, clock.now_ms())?;
                ConversationStore::open(db_path, max_bytes, clock)
            }
            Err(error) => Err(error),
        }
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path, timestamp: i64) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = db_path.with_file_name(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale sidecar file {}", sidecar.display());
            }
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Auth
    // ---------------------------------------------------------------------

    /// Record the current auth status and forward it to the sync runner.
    pub async fn set_auth(&self, auth: AuthStatus) {
        *self.auth.lock().await = auth.clone();
        self.send(SyncSignal::AuthChanged(auth));
    }

    pub async fn auth(&self) -> AuthStatus {
        self.auth.lock().await.clone()
    }

    fn send(&self, signal: SyncSignal) {
        if let Some(sender) = &self.signals {
            if sender.send(signal).is_err() {
                tracing::debug!("Sync runner is gone; dropping signal");
            }
        }
    }

    fn notify(&self, id: ConversationId, immediate: bool) {
        self.send(SyncSignal::LocalChange { id, immediate });
    }

    // ---------------------------------------------------------------------
    // Conversations
    // ---------------------------------------------------------------------

    /// Create an empty conversation and make it current.
    pub async fn create_conversation(&self) -> Result<ConversationMeta> {
        let auth = self.auth().await;
        let meta = {
            let store = self.store.lock().await;
            let meta = ConversationMeta::new(ConversationId::new(), store.now_ms());
            self.persist(&store, &auth, &meta, &ConversationPayload::default())?;
            store.set_current_conversation(Some(&meta.id))?;
            meta
        };
        tracing::debug!("Created conversation {}", meta.id);
        self.notify(meta.id, false);
        Ok(meta)
    }

    /// List conversations newest-first.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let store = self.store.lock().await;
        let cached_ids = store.payload_ids()?;
        let mut summaries = Vec::new();

        for meta in store.read_metas()? {
            let payload = if cached_ids.contains(&meta.id) {
                store.read_payload(&meta.id)?
            } else {
                None
            };
            summaries.push(ConversationSummary {
                title: meta.display_title(payload.as_ref()),
                message_count: payload.as_ref().map_or(0, |payload| payload.messages.len()),
                cached: payload.is_some(),
                meta,
            });
        }

        Ok(summaries)
    }

    pub async fn get_meta(&self, id: &ConversationId) -> Result<Option<ConversationMeta>> {
        let store = self.store.lock().await;
        store.read_meta(id)
    }

    /// Load a conversation payload.
    ///
    /// An unreadable payload of a known conversation loads as an empty one.
    /// An evicted payload fails with [`Error::Evicted`] and is queued for
    /// restoring from the remote.
    pub async fn load_payload(&self, id: &ConversationId) -> Result<ConversationPayload> {
        let store = self.store.lock().await;
        self.read_cached(&store, id).map(|(_, payload)| payload)
    }

    /// The open conversation, falling back to the newest one or a new one.
    pub async fn current_conversation(&self) -> Result<ConversationMeta> {
        let auth = self.auth().await;
        let created = {
            let store = self.store.lock().await;
            if let Some(id) = store.current_conversation()? {
                if let Some(meta) = store.read_meta(&id)? {
                    return Ok(meta);
                }
            }
            if let Some(newest) = store.read_metas()?.into_iter().next() {
                store.set_current_conversation(Some(&newest.id))?;
                return Ok(newest);
            }

            let meta = ConversationMeta::new(ConversationId::new(), store.now_ms());
            self.persist(&store, &auth, &meta, &ConversationPayload::default())?;
            store.set_current_conversation(Some(&meta.id))?;
            meta
        };
        self.notify(created.id, false);
        Ok(created)
    }

    /// Id of the open conversation, without creating one.
    pub async fn current_conversation_id(&self) -> Result<Option<ConversationId>> {
        let store = self.store.lock().await;
        store.current_conversation()
    }

    /// Make `id` the open conversation and return its payload.
    pub async fn switch_conversation(&self, id: &ConversationId) -> Result<ConversationPayload> {
        let store = self.store.lock().await;
        let (_, payload) = self.read_cached(&store, id)?;
        store.set_current_conversation(Some(id))?;
        Ok(payload)
    }

    /// Replace a conversation's payload wholesale.
    pub async fn save_payload(
        &self,
        id: &ConversationId,
        payload: ConversationPayload,
        immediate: bool,
    ) -> Result<ConversationMeta> {
        if !payload.is_consistent() {
            return Err(Error::InvalidInput(
                "diagram xml does not match the version at the cursor".to_string(),
            ));
        }
        let ((), meta) = self
            .mutate(id, immediate, move |current, _| {
                *current = payload;
                Ok(())
            })
            .await?;
        Ok(meta)
    }

    /// Set or clear the title.
    pub async fn rename_conversation(
        &self,
        id: &ConversationId,
        title: Option<&str>,
    ) -> Result<ConversationMeta> {
        let title = normalize_text_option(title.map(str::to_string));
        let ((), meta) = self
            .mutate(id, false, move |_, meta| {
                meta.title = title;
                Ok(())
            })
            .await?;
        Ok(meta)
    }

    /// Optimistic rename: apply locally, then ask `confirm` to accept it.
    ///
    /// When `confirm` fails the previous title is restored, unless the title
    /// was changed again in the meantime.
    pub async fn rename_conversation_with<F, Fut>(
        &self,
        id: &ConversationId,
        title: Option<&str>,
        confirm: F,
    ) -> Result<ConversationMeta>
    where
        F: FnOnce(ConversationMeta) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let previous = self
            .get_meta(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let optimistic = self.rename_conversation(id, title).await?;

        match confirm(optimistic.clone()).await {
            Ok(()) => Ok(optimistic),
            Err(error) => {
                tracing::warn!("Rename of {id} was rejected ({error}); rolling back");
                let expected = optimistic.title;
                let restored = previous.title;
                self.mutate(id, false, move |_, meta| {
                    if meta.title == expected {
                        meta.title = restored;
                    }
                    Ok(())
                })
                .await?;
                Err(error)
            }
        }
    }

    /// Delete a conversation and queue a tombstone for the remote.
    ///
    /// The current pointer moves to the newest remaining conversation, or to a
    /// freshly created one when none remain.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<DeleteOutcome> {
        let outcome = {
            let store = self.store.lock().await;
            let now = store.now_ms();
            let meta = store
                .read_meta(id)?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            store.remove_payload(id)?;
            store.remove_meta(id)?;
            store.clear_pending_push(id)?;
            store.add_tombstone(Tombstone {
                id: *id,
                created_at: meta.created_at,
                deleted_at: next_updated_at(meta.updated_at, now),
            })?;

            let mut synthesized = false;
            let current = match store.current_conversation()? {
                Some(current) if &current != id && store.read_meta(&current)?.is_some() => current,
                _ => {
                    if let Some(newest) = store.read_metas()?.first() {
                        newest.id
                    } else {
                        let fresh = ConversationMeta::new(ConversationId::new(), now);
                        store.write_conversation(&fresh, &ConversationPayload::default())?;
                        store.mark_pending_push(&fresh.id)?;
                        synthesized = true;
                        fresh.id
                    }
                }
            };
            store.set_current_conversation(Some(&current))?;

            DeleteOutcome {
                deleted: *id,
                current,
                synthesized,
            }
        };

        tracing::info!("Deleted conversation {id}");
        self.notify(*id, true);
        if outcome.synthesized {
            self.notify(outcome.current, true);
        }
        Ok(outcome)
    }

    /// Delete the least-recently-updated conversation other than the open one.
    pub async fn delete_oldest_conversation(&self) -> Result<Option<DeleteOutcome>> {
        let oldest = {
            let store = self.store.lock().await;
            let current = store.current_conversation()?;
            store
                .read_metas()?
                .into_iter()
                .filter(|meta| Some(meta.id) != current)
                .min_by_key(|meta| meta.updated_at)
                .map(|meta| meta.id)
        };
        match oldest {
            Some(id) => self.delete_conversation(&id).await.map(Some),
            None => Ok(None),
        }
    }

    // ---------------------------------------------------------------------
    // Messages and diagram history
    // ---------------------------------------------------------------------

    /// Append a user message, snapshotting the diagram shown when it was sent.
    ///
    /// Returns the message index.
    pub async fn send_user_message<C: DiagramCanvas>(
        &self,
        id: &ConversationId,
        content: &str,
        canvas: &C,
    ) -> Result<usize> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::InvalidInput("message cannot be empty".to_string()));
        }
        let xml = canvas.export_diagram().await?;
        let max_versions = self.config.max_diagram_versions;

        let (index, _) = self
            .mutate(id, false, move |payload, meta| {
                let now = meta.updated_at;
                payload.messages.push(Message::user(content, now));
                let index = payload.messages.len() - 1;
                DiagramHistory::new(payload, max_versions).ensure_version_for_message(
                    index,
                    &xml,
                    VersionLabel::BeforeSend,
                    now,
                );
                Ok(index)
            })
            .await?;
        Ok(index)
    }

    /// Append a finished model message; pushed without debounce.
    pub async fn record_assistant_message(
        &self,
        id: &ConversationId,
        message: Message,
    ) -> Result<usize> {
        let (index, _) = self
            .mutate(id, true, move |payload, _| {
                payload.messages.push(message);
                Ok(payload.messages.len() - 1)
            })
            .await?;
        Ok(index)
    }

    /// Record a diagram produced by a tool call as a new version.
    pub async fn record_diagram(
        &self,
        id: &ConversationId,
        xml: &str,
        label: VersionLabel,
    ) -> Result<usize> {
        let max_versions = self.config.max_diagram_versions;
        let (index, _) = self
            .mutate(id, false, move |payload, meta| {
                Ok(DiagramHistory::new(payload, max_versions).append_version(
                    xml,
                    label,
                    meta.updated_at,
                ))
            })
            .await?;
        Ok(index)
    }

    /// Step back one version and render it.
    ///
    /// Returns `None` at the oldest version. Nothing is saved if the canvas
    /// rejects the diagram.
    pub async fn undo<C: DiagramCanvas>(
        &self,
        id: &ConversationId,
        canvas: &mut C,
    ) -> Result<Option<DiagramVersion>> {
        self.step_history(id, canvas, |history| history.undo().cloned())
            .await
    }

    /// Step forward one version and render it.
    pub async fn redo<C: DiagramCanvas>(
        &self,
        id: &ConversationId,
        canvas: &mut C,
    ) -> Result<Option<DiagramVersion>> {
        self.step_history(id, canvas, |history| history.redo().cloned())
            .await
    }

    async fn step_history<C: DiagramCanvas>(
        &self,
        id: &ConversationId,
        canvas: &mut C,
        step: impl FnOnce(&mut DiagramHistory<'_>) -> Option<DiagramVersion>,
    ) -> Result<Option<DiagramVersion>> {
        let max_versions = self.config.max_diagram_versions;
        let (version, _) = self
            .mutate(id, false, move |payload, _| {
                let mut history = DiagramHistory::new(payload, max_versions);
                let Some(version) = step(&mut history) else {
                    return Ok(None);
                };
                apply_to_canvas(canvas, &version.xml)?;
                Ok(Some(version))
            })
            .await?;
        Ok(version)
    }

    /// Diagram xml saved for a message; a missing snapshot is an error.
    pub async fn xml_for_message(&self, id: &ConversationId, message_index: usize) -> Result<String> {
        let mut payload = self.load_payload(id).await?;
        let history = DiagramHistory::new(&mut payload, self.config.max_diagram_versions);
        history.require_xml_for_message(message_index).map(str::to_string)
    }

    pub async fn previous_xml_before_message(
        &self,
        id: &ConversationId,
        message_index: usize,
    ) -> Result<String> {
        let mut payload = self.load_payload(id).await?;
        let history = DiagramHistory::new(&mut payload, self.config.max_diagram_versions);
        Ok(history.previous_xml_before_message(message_index))
    }

    /// Cut the conversation back to `message_index` for a regenerate or edit.
    ///
    /// Later messages and their diagram versions are discarded and the
    /// diagram left at the cursor is rendered. Returns that xml.
    pub async fn rewind_to_message<C: DiagramCanvas>(
        &self,
        id: &ConversationId,
        message_index: usize,
        canvas: &mut C,
    ) -> Result<String> {
        let max_versions = self.config.max_diagram_versions;
        let (xml, _) = self
            .mutate(id, true, move |payload, _| {
                if message_index >= payload.messages.len() {
                    return Err(Error::InvalidInput(format!(
                        "message {message_index} does not exist"
                    )));
                }
                payload.messages.truncate(message_index + 1);
                DiagramHistory::new(payload, max_versions)
                    .truncate_versions_after_message(message_index);
                apply_to_canvas(canvas, &payload.xml)?;
                Ok(payload.xml.clone())
            })
            .await?;
        Ok(xml)
    }

    // ---------------------------------------------------------------------
    // Cache, conflicts, export
    // ---------------------------------------------------------------------

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let auth = self.auth().await;
        let store = self.store.lock().await;
        self.quota
            .cache_stats(&store, auth.user_id(), auth.is_authenticated())
    }

    /// Run a cleanup pass; the open conversation is kept.
    pub async fn cleanup_cache(&self) -> Result<CleanupReport> {
        let auth = self.auth().await;
        let store = self.store.lock().await;
        let current = store.current_conversation()?;
        self.quota.smart_cache_cleanup(
            &store,
            current.as_ref(),
            auth.user_id(),
            auth.is_authenticated(),
        )
    }

    /// List recently rejected remote records.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let store = self.store.lock().await;
        store.list_conflicts(limit)
    }

    /// Import legacy single-chat data, if any is present.
    pub async fn migrate_legacy(&self) -> Result<MigrationResult> {
        let store = self.store.lock().await;
        migrate_legacy_if_present(&store)
    }

    /// Render every locally cached conversation, newest first.
    pub async fn export_conversations(&self, format: ExportFormat) -> Result<String> {
        let store = self.store.lock().await;
        let mut conversations = Vec::new();
        for meta in store.read_metas()? {
            if let Some(payload) = store.read_payload(&meta.id)? {
                conversations.push((meta, payload));
            }
        }
        Ok(render_conversations_export(&conversations, format)?)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn read_existing(
        store: &ConversationStore,
        id: &ConversationId,
    ) -> Result<(ConversationMeta, ConversationPayload)> {
        let meta = store
            .read_meta(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let payload = match store.read_payload(id)? {
            Some(payload) => payload,
            None if store.is_evicted(id)? => return Err(Error::Evicted(id.to_string())),
            None => {
                tracing::warn!("No readable payload for {id}; loading an empty conversation");
                ConversationPayload::default()
            }
        };
        Ok((meta, payload))
    }

    /// [`Self::read_existing`], asking sync to restore an evicted payload.
    fn read_cached(
        &self,
        store: &ConversationStore,
        id: &ConversationId,
    ) -> Result<(ConversationMeta, ConversationPayload)> {
        let result = Self::read_existing(store, id);
        if let Err(Error::Evicted(_)) = &result {
            tracing::debug!("Conversation {id} was evicted; requesting it from the remote");
            self.send(SyncSignal::Rehydrate(*id));
        }
        result
    }

    /// Load, change, and persist one conversation.
    ///
    /// `apply` receives the meta with `updated_at` already set to the stamp
    /// the write will carry. Nothing is written when `apply` fails or leaves
    /// the conversation unchanged.
    async fn mutate<T>(
        &self,
        id: &ConversationId,
        immediate: bool,
        apply: impl FnOnce(&mut ConversationPayload, &mut ConversationMeta) -> Result<T>,
    ) -> Result<(T, ConversationMeta)> {
        let auth = self.auth().await;
        let (value, meta, changed) = {
            let store = self.store.lock().await;
            let (original_meta, original_payload) = self.read_cached(&store, id)?;

            let mut meta = original_meta.clone();
            meta.updated_at = next_updated_at(original_meta.updated_at, store.now_ms());
            let mut payload = original_payload.clone();
            let value = apply(&mut payload, &mut meta)?;

            let changed = payload != original_payload
                || meta.title != original_meta.title
                || meta.created_at != original_meta.created_at;
            if changed {
                self.persist(&store, &auth, &meta, &payload)?;
                (value, meta, true)
            } else {
                (value, original_meta, false)
            }
        };

        if changed {
            self.notify(*id, immediate);
        }
        Ok((value, meta))
    }

    fn persist(
        &self,
        store: &ConversationStore,
        auth: &AuthStatus,
        meta: &ConversationMeta,
        payload: &ConversationPayload,
    ) -> Result<()> {
        let current = store.current_conversation()?;
        if let Err(error) = self.quota.write_with_cleanup(
            store,
            meta,
            payload,
            current.as_ref(),
            auth.user_id(),
            auth.is_authenticated(),
        ) {
            tracing::warn!("Failed to save conversation {}: {error}", meta.id);
            return Err(error);
        }
        store.mark_pending_push(&meta.id)
    }
}

/// Next `updated_at` stamp: strictly after `previous`, never behind the clock.
fn next_updated_at(previous: i64, now: i64) -> i64 {
    now.max(previous.saturating_add(1))
}

fn apply_to_canvas<C: DiagramCanvas>(canvas: &mut C, xml: &str) -> Result<()> {
    match canvas.apply_diagram(xml) {
        None => Ok(()),
        Some(reason) => Err(Error::InvalidInput(format!("diagram rejected: {reason}"))),
    }
}
