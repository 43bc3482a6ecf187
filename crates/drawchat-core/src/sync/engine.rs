//! Sync engine
//!
//! Owns all in-flight sync bookkeeping: per-conversation push state, the
//! debounce timers, the single-flight pull guard, the bootstrapped-user marker
//! and the poll schedule. Everything is reset when the signed-in user changes.
//!
//! Conversations remote-known under one account are never pushed for another
//! one; conversations no account has seen yet are adopted by whoever signs in.
//! When both the store and the engine state are locked, the store is locked
//! first.
//!
//! Network failures never surface as errors here. They are logged, recorded in
//! [`SyncHealth`] and retried on the next trigger. Only local store failures
//! are returned to the caller.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::remote::RemoteStore;
use super::scheduler::DebounceScheduler;
use super::{AuthStatus, SyncSignal};
use crate::clock::Clock;
use crate::config::{StoreConfig, SyncConfig};
use crate::error::Result;
use crate::models::{
    ConversationId, ConversationMeta, ConversationPayload, ConversationPushItem, RemoteRecord,
};
use crate::quota::CacheQuotaManager;
use crate::store::{sort_metas, ConversationStore};
use crate::util::normalize_text_option;

/// Push lifecycle of a single conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushState {
    Clean,
    PendingPush,
    Pushing,
    /// Last attempt failed; retried on the next trigger
    PushFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullState {
    Idle,
    Pulling,
}

/// Passive status for UI indication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHealth {
    pub last_ok_at: Option<i64>,
    pub last_error_at: Option<i64>,
    pub last_error: Option<String>,
}

impl SyncHealth {
    fn record_ok(&mut self, now_ms: i64) {
        self.last_ok_at = Some(now_ms);
    }

    fn record_error(&mut self, now_ms: i64, error: impl std::fmt::Display) {
        self.last_error_at = Some(now_ms);
        self.last_error = Some(error.to_string());
    }

    /// No error since the last success.
    pub fn is_healthy(&self) -> bool {
        match (self.last_ok_at, self.last_error_at) {
            (_, None) => true,
            (Some(ok), Some(error)) => ok >= error,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// No conversation was due
    Nothing,
    /// Offline or signed out; pushes stay pending
    Deferred,
    Pushed { count: usize },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Offline or signed out
    Skipped,
    /// Another pull is in flight
    AlreadyRunning,
    Applied(ApplyReport),
    Failed,
}

/// What merging a page of remote records changed locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub deleted: usize,
    /// Remote records rejected because the local copy was not older
    pub conflicts: usize,
    /// Records with an unreadable id or payload
    pub skipped: usize,
    /// New current conversation when the open one was deleted remotely
    pub current_changed: Option<ConversationId>,
    pub synthesized: bool,
    /// The page was full; another pull follows
    pub has_more: bool,
}

impl ApplyReport {
    pub const fn changed(&self) -> bool {
        self.applied > 0 || self.deleted > 0 || self.current_changed.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub bootstrapped: bool,
    pub push: Option<PushOutcome>,
    pub pull: Option<PullOutcome>,
}

struct EngineState {
    auth: AuthStatus,
    online: bool,
    /// Bumped on every user switch so late results can be told apart
    generation: u64,
    push_states: HashMap<ConversationId, PushState>,
    debounce: DebounceScheduler<ConversationId>,
    pull_due_at: Option<i64>,
    next_poll_at: Option<i64>,
    bootstrapped_user: Option<String>,
    /// Next pull starts from the beginning to restore evicted payloads
    rewind: bool,
    health: SyncHealth,
}

impl EngineState {
    fn new(debounce_ms: u64) -> Self {
        Self {
            auth: AuthStatus::Unauthenticated,
            online: true,
            generation: 0,
            push_states: HashMap::new(),
            debounce: DebounceScheduler::new(debounce_ms),
            pull_due_at: None,
            next_poll_at: None,
            bootstrapped_user: None,
            rewind: false,
            health: SyncHealth::default(),
        }
    }

    fn active_user(&self) -> Option<(String, u64)> {
        if !self.online {
            return None;
        }
        self.auth
            .user_id()
            .map(|user_id| (user_id.to_string(), self.generation))
    }

    fn reset_bookkeeping(&mut self) {
        self.generation += 1;
        self.push_states.clear();
        self.debounce.clear();
        self.pull_due_at = None;
        self.next_poll_at = None;
        self.bootstrapped_user = None;
        self.health = SyncHealth::default();
    }

    fn request_pull_at(&mut self, at_ms: i64) {
        self.pull_due_at = Some(self.pull_due_at.map_or(at_ms, |due| due.min(at_ms)));
    }

    fn set_push_state(&mut self, id: ConversationId, push_state: PushState) {
        if push_state == PushState::Clean {
            self.push_states.remove(&id);
        } else {
            self.push_states.insert(id, push_state);
        }
    }
}

/// Clears the single-flight flag when a pull ends, however it ends.
struct PullGuard<'a>(&'a AtomicBool);

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine<R> {
    store: Arc<Mutex<ConversationStore>>,
    remote: R,
    config: SyncConfig,
    quota: CacheQuotaManager,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
    pulling: AtomicBool,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(
        store: Arc<Mutex<ConversationStore>>,
        remote: R,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            remote,
            config: config.sync.clone(),
            quota: CacheQuotaManager::new(config.quota),
            clock,
            state: Mutex::new(EngineState::new(config.sync.debounce_ms)),
            pulling: AtomicBool::new(false),
        }
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn delay_ms(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    pub async fn health(&self) -> SyncHealth {
        self.state.lock().await.health.clone()
    }

    pub async fn push_state(&self, id: &ConversationId) -> PushState {
        self.state
            .lock()
            .await
            .push_states
            .get(id)
            .copied()
            .unwrap_or(PushState::Clean)
    }

    pub fn pull_state(&self) -> PullState {
        if self.pulling.load(Ordering::Acquire) {
            PullState::Pulling
        } else {
            PullState::Idle
        }
    }

    pub async fn auth(&self) -> AuthStatus {
        self.state.lock().await.auth.clone()
    }

    pub async fn is_online(&self) -> bool {
        self.state.lock().await.online
    }

    pub async fn bootstrapped_user(&self) -> Option<String> {
        self.state.lock().await.bootstrapped_user.clone()
    }

    // ---------------------------------------------------------------------
    // Signals
    // ---------------------------------------------------------------------

    pub async fn handle_signal(&self, signal: SyncSignal) -> Result<()> {
        match signal {
            SyncSignal::LocalChange { id, immediate } => self.schedule_push(id, immediate).await,
            SyncSignal::Rehydrate(id) => self.request_rehydrate(id).await,
            SyncSignal::Online => self.set_online(true).await?,
            SyncSignal::Offline => self.set_online(false).await?,
            SyncSignal::Focus | SyncSignal::Visible => self.request_pull().await,
            SyncSignal::AuthChanged(auth) => self.set_auth(auth).await,
            SyncSignal::Shutdown => {}
        }
        Ok(())
    }

    /// Apply an auth transition; switching users resets all bookkeeping.
    pub async fn set_auth(&self, auth: AuthStatus) {
        let now = self.now();
        let mut state = self.state.lock().await;
        if state.auth == auth {
            return;
        }

        if state.auth.user_id() != auth.user_id() {
            tracing::info!(
                "Auth changed ({:?} -> {:?}); resetting sync bookkeeping",
                state.auth.user_id(),
                auth.user_id()
            );
            state.reset_bookkeeping();
        }
        if auth.is_authenticated() {
            state.request_pull_at(now);
        }
        state.auth = auth;
    }

    pub async fn set_online(&self, online: bool) -> Result<()> {
        let now = self.now();
        {
            let mut state = self.state.lock().await;
            if state.online == online {
                return Ok(());
            }
            state.online = online;
            if online {
                state.request_pull_at(now);
            }
        }

        tracing::debug!("Sync connectivity changed: online={online}");
        if online {
            self.requeue_pending().await?;
        }
        Ok(())
    }

    /// Pull on the next tick (focus and visibility triggers).
    pub async fn request_pull(&self) {
        let now = self.now();
        self.state.lock().await.request_pull_at(now);
    }

    /// Re-read the remote from the beginning on the next tick.
    ///
    /// Records for evicted conversations come back with the `updated_at` the
    /// local meta already has, which is what restores their payload.
    pub async fn request_rehydrate(&self, id: ConversationId) {
        let now = self.now();
        let mut state = self.state.lock().await;
        tracing::debug!("Restoring evicted conversation {id}; next pull starts from the beginning");
        state.rewind = true;
        state.request_pull_at(now);
    }

    /// Arm a push for `id`, replacing any not-yet-fired one.
    pub async fn schedule_push(&self, id: ConversationId, immediate: bool) {
        let now = self.now();
        let mut state = self.state.lock().await;
        if immediate {
            state.debounce.arm_at(id, now);
        } else {
            state.debounce.arm(id, now);
        }
        // An in-flight push is never cancelled; the new one queues behind it
        if state.push_states.get(&id) != Some(&PushState::Pushing) {
            state.set_push_state(id, PushState::PendingPush);
        }
    }

    /// Arm immediate pushes for everything the store still has pending.
    async fn requeue_pending(&self) -> Result<()> {
        let ids: BTreeSet<ConversationId> = {
            let store = self.store.lock().await;
            let mut ids = store.read_pending_pushes()?;
            ids.extend(store.read_tombstones()?.into_iter().map(|tombstone| tombstone.id));
            ids
        };

        let now = self.now();
        let mut state = self.state.lock().await;
        for id in ids {
            if state.debounce.due_at(&id).is_none_or(|due| due > now) {
                state.debounce.arm_at(id, now);
            }
            if state.push_states.get(&id) != Some(&PushState::Pushing) {
                state.set_push_state(id, PushState::PendingPush);
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Push
    // ---------------------------------------------------------------------

    /// Push every conversation whose debounce window has elapsed.
    pub async fn push_due(&self) -> Result<PushOutcome> {
        let now = self.now();
        let due = {
            let mut state = self.state.lock().await;
            if !state.debounce.has_due(now) {
                return Ok(PushOutcome::Nothing);
            }
            if state.active_user().is_none() {
                return Ok(PushOutcome::Deferred);
            }
            state.debounce.take_due(now)
        };
        self.push_ids(due).await
    }

    /// Push the given conversations right away, bypassing the debounce.
    pub async fn push_now(&self, ids: &[ConversationId]) -> Result<PushOutcome> {
        {
            let mut state = self.state.lock().await;
            for id in ids {
                state.debounce.cancel(id);
            }
        }
        self.push_ids(ids.to_vec()).await
    }

    async fn push_ids(&self, ids: Vec<ConversationId>) -> Result<PushOutcome> {
        let active = self.state.lock().await.active_user();
        let Some((user_id, generation)) = active else {
            let mut state = self.state.lock().await;
            let now = self.now();
            for id in ids {
                state.debounce.arm_at(id, now);
                state.set_push_state(id, PushState::PendingPush);
            }
            return Ok(PushOutcome::Deferred);
        };

        let items = {
            let store = self.store.lock().await;
            collect_push_items(&store, &user_id, &ids)?
        };
        if items.is_empty() {
            let mut state = self.state.lock().await;
            for id in &ids {
                if !state.debounce.is_armed(id) {
                    state.set_push_state(*id, PushState::Clean);
                }
            }
            return Ok(PushOutcome::Nothing);
        }

        let pushed_ids: Vec<ConversationId> = items
            .iter()
            .filter_map(|item| item.id.parse().ok())
            .collect();
        {
            let mut state = self.state.lock().await;
            for id in &pushed_ids {
                state.set_push_state(*id, PushState::Pushing);
            }
        }

        tracing::debug!("Pushing {} conversations for {user_id}", items.len());
        let result = self.remote.push(&items).await;
        let now = self.now();

        match result {
            Ok(response) => {
                let still_pending = {
                    let store = self.store.lock().await;
                    // A device that has never pulled keeps pulling from the start
                    if store.read_cursor(&user_id)?.is_some() {
                        store.write_cursor(&user_id, &response.cursor)?;
                    }
                    acknowledge_push(&store, &user_id, &items)?
                };

                let mut state = self.state.lock().await;
                if state.generation == generation {
                    for id in &pushed_ids {
                        if still_pending.contains(id) && !state.debounce.is_armed(id) {
                            state.debounce.arm(*id, now);
                        }
                        let next = if state.debounce.is_armed(id) {
                            PushState::PendingPush
                        } else {
                            PushState::Clean
                        };
                        state.set_push_state(*id, next);
                    }
                    state.health.record_ok(now);
                    state.request_pull_at(
                        now.saturating_add(Self::delay_ms(self.config.post_push_pull_delay_ms)),
                    );
                }
                tracing::info!("Pushed {} conversations", items.len());
                Ok(PushOutcome::Pushed { count: items.len() })
            }
            Err(error) => {
                tracing::warn!("Sync push failed: {error}");
                let mut state = self.state.lock().await;
                if state.generation == generation {
                    for id in &pushed_ids {
                        state.set_push_state(*id, PushState::PushFailed);
                    }
                    state.health.record_error(now, &error);
                }
                Ok(PushOutcome::Failed)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Pull
    // ---------------------------------------------------------------------

    /// Fetch and merge one page of remote changes.
    ///
    /// Concurrent calls collapse: while a pull is in flight, others return
    /// [`PullOutcome::AlreadyRunning`] without touching the network.
    pub async fn pull(&self) -> Result<PullOutcome> {
        if self
            .pulling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Pull already in flight; skipping");
            return Ok(PullOutcome::AlreadyRunning);
        }
        let _guard = PullGuard(&self.pulling);

        let (user_id, generation, rewind) = {
            let mut state = self.state.lock().await;
            let Some((user_id, generation)) = state.active_user() else {
                return Ok(PullOutcome::Skipped);
            };
            (user_id, generation, std::mem::take(&mut state.rewind))
        };

        let cursor = if rewind {
            None
        } else {
            self.store.lock().await.read_cursor(&user_id)?
        };
        let page_size = self.config.page_size;
        let result = self.remote.pull(cursor.as_ref(), page_size).await;
        let now = self.now();

        match result {
            Ok(response) => {
                let full_page = response.conversations.len() >= page_size;
                let Some(mut report) = self
                    .apply_records(&user_id, generation, &response.conversations)
                    .await?
                else {
                    return Ok(PullOutcome::Skipped);
                };
                report.has_more = full_page;
                self.store
                    .lock()
                    .await
                    .write_cursor(&user_id, &response.cursor)?;

                let mut state = self.state.lock().await;
                if state.generation == generation {
                    state.health.record_ok(now);
                    if state.pull_due_at.is_some_and(|due| due <= now) {
                        state.pull_due_at = None;
                    }
                    if full_page {
                        state.request_pull_at(now);
                    }
                    state.next_poll_at =
                        Some(now.saturating_add(Self::delay_ms(self.config.poll_interval_ms)));
                }
                if report.changed() {
                    tracing::info!(
                        "Pulled {} updates and {} deletions ({} conflicts, {} skipped)",
                        report.applied,
                        report.deleted,
                        report.conflicts,
                        report.skipped
                    );
                }
                Ok(PullOutcome::Applied(report))
            }
            Err(error) => {
                tracing::warn!("Sync pull failed: {error}");
                let mut state = self.state.lock().await;
                state.rewind |= rewind;
                if state.generation == generation {
                    state.health.record_error(now, &error);
                    if state.pull_due_at.is_some_and(|due| due <= now) {
                        state.pull_due_at = None;
                    }
                    state.next_poll_at =
                        Some(now.saturating_add(Self::delay_ms(self.config.poll_interval_ms)));
                }
                Ok(PullOutcome::Failed)
            }
        }
    }

    /// Merge remote records into the local store by last-write-wins.
    ///
    /// Tombstones always apply. A live record replaces the local copy only
    /// when it is strictly newer, or when the local payload was evicted.
    pub async fn apply_remote(&self, user_id: &str, records: &[RemoteRecord]) -> Result<ApplyReport> {
        let generation = self.state.lock().await.generation;
        Ok(self
            .apply_records(user_id, generation, records)
            .await?
            .unwrap_or_default())
    }

    /// Merge a page fetched during `generation`.
    ///
    /// Returns `None` without writing anything when the signed-in user changed
    /// since. The engine state stays locked for the whole merge, so an auth
    /// switch lands either before it or after it.
    async fn apply_records(
        &self,
        user_id: &str,
        generation: u64,
        records: &[RemoteRecord],
    ) -> Result<Option<ApplyReport>> {
        let now = self.now();
        let mut report = ApplyReport::default();
        let mut superseded = Vec::new();

        let store = self.store.lock().await;
        let mut state = self.state.lock().await;
        if state.generation != generation {
            tracing::debug!(
                "Discarding {} remote records fetched for {user_id} before an auth change",
                records.len()
            );
            return Ok(None);
        }
        let current = store.current_conversation()?;

        for record in records {
            let Ok(id) = record.id.parse::<ConversationId>() else {
                tracing::warn!("Skipping remote record with invalid id {:?}", record.id);
                report.skipped += 1;
                continue;
            };

            if record.deleted {
                let removed_payload = store.remove_payload(&id)?;
                let removed_meta = store.remove_meta(&id)?;
                store.remove_tombstone(&id)?;
                store.clear_pending_push(&id)?;
                store.clear_evicted(&id)?;
                store.set_remote_known(user_id, &id, false)?;
                if removed_payload || removed_meta {
                    report.deleted += 1;
                }
                superseded.push(id);
                continue;
            }

            let Some(payload) = decode_payload(record) else {
                report.skipped += 1;
                continue;
            };
            store.set_remote_known(user_id, &id, true)?;

            let local_meta = store.read_meta(&id)?;
            let local_payload = store.read_payload(&id)?;
            let tombstone_at = store
                .read_tombstones()?
                .into_iter()
                .find(|tombstone| tombstone.id == id)
                .map(|tombstone| tombstone.deleted_at);
            let local_updated_at = local_meta
                .as_ref()
                .map(|meta| meta.updated_at)
                .or(tombstone_at);

            if let Some(local_at) = local_updated_at {
                let evicted = local_meta.is_some() && local_payload.is_none();
                let newer = record.updated_at > local_at || (evicted && record.updated_at == local_at);
                if !newer {
                    if record.updated_at < local_at || local_payload.as_ref() != Some(&payload) {
                        store.record_conflict(&id, local_at, record.updated_at)?;
                        report.conflicts += 1;
                        tracing::debug!(
                            "Kept local {id} (local {local_at} >= remote {})",
                            record.updated_at
                        );
                    }
                    continue;
                }
            }

            let meta = ConversationMeta {
                id,
                created_at: record.created_at,
                updated_at: record.updated_at,
                title: normalize_text_option(record.title.clone()),
            };
            match self.quota.write_with_cleanup(
                &store,
                &meta,
                &payload,
                current.as_ref(),
                Some(user_id),
                true,
            ) {
                Ok(()) => {}
                Err(error) if error.is_quota_exceeded() => {
                    tracing::warn!("No room to store remote conversation {id}: {error}");
                    report.skipped += 1;
                    continue;
                }
                Err(error) => return Err(error),
            }
            store.remove_tombstone(&id)?;
            store.clear_pending_push(&id)?;
            superseded.push(id);
            report.applied += 1;
        }

        if report.applied > 0 || report.deleted > 0 {
            let mut metas = store.read_metas()?;
            sort_metas(&mut metas);
            store.write_metas(&metas)?;
        }

        if let Some(current) = current {
            if store.read_meta(&current)?.is_none() {
                let replacement = match store.read_metas()?.first() {
                    Some(newest) => newest.id,
                    None => {
                        let meta = ConversationMeta::new(ConversationId::new(), now);
                        store.write_conversation(&meta, &ConversationPayload::default())?;
                        store.mark_pending_push(&meta.id)?;
                        report.synthesized = true;
                        meta.id
                    }
                };
                store.set_current_conversation(Some(&replacement))?;
                report.current_changed = Some(replacement);
                tracing::info!("Current conversation {current} was deleted remotely; switched to {replacement}");
            }
        }
        drop(store);

        for id in &superseded {
            state.debounce.cancel(id);
            state.set_push_state(*id, PushState::Clean);
        }
        if let (true, Some(id)) = (report.synthesized, report.current_changed) {
            state.debounce.arm_at(id, now);
            state.set_push_state(id, PushState::PendingPush);
        }

        Ok(Some(report))
    }

    // ---------------------------------------------------------------------
    // Bootstrap and timers
    // ---------------------------------------------------------------------

    /// First contact for a signed-in user: push every local conversation the
    /// remote has not seen, then pull once. Runs once per user per session.
    ///
    /// Conversations remote-known under another account stay with it.
    pub async fn bootstrap(&self) -> Result<Option<PullOutcome>> {
        let active = {
            let state = self.state.lock().await;
            state
                .active_user()
                .filter(|(user_id, _)| state.bootstrapped_user.as_deref() != Some(user_id))
        };
        let Some((user_id, generation)) = active else {
            return Ok(None);
        };

        let ids: Vec<ConversationId> = {
            let store = self.store.lock().await;
            let known = store.read_remote_known(&user_id)?;
            let foreign = store.read_remote_known_elsewhere(&user_id)?;
            let mut ids: BTreeSet<ConversationId> = store
                .payload_ids()?
                .into_iter()
                .filter(|id| !known.contains(id))
                .collect();
            ids.extend(store.read_tombstones()?.into_iter().map(|tombstone| tombstone.id));
            ids.retain(|id| known.contains(id) || !foreign.contains(id));
            ids.into_iter().collect()
        };

        tracing::info!(
            "Bootstrapping sync for {user_id}: {} local conversations to push",
            ids.len()
        );
        if !ids.is_empty() {
            self.push_now(&ids).await?;
        }

        {
            let mut state = self.state.lock().await;
            if state.generation == generation {
                state.bootstrapped_user = Some(user_id);
            }
        }

        Ok(Some(self.pull().await?))
    }

    async fn needs_bootstrap(&self) -> bool {
        let state = self.state.lock().await;
        state
            .active_user()
            .is_some_and(|(user_id, _)| state.bootstrapped_user.as_deref() != Some(&user_id))
    }

    /// Run whatever is due: bootstrap, debounced pushes, scheduled pulls.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let now = self.now();

        {
            let state = self.state.lock().await;
            if state.active_user().is_none() {
                if state.debounce.has_due(now) {
                    report.push = Some(PushOutcome::Deferred);
                }
                return Ok(report);
            }
        }

        if self.needs_bootstrap().await {
            report.pull = self.bootstrap().await?;
            report.bootstrapped = true;
        }

        let push = self.push_due().await?;
        if push != PushOutcome::Nothing {
            report.push = Some(push);
        }

        let now = self.now();
        let (pull_due, poll_due) = {
            let state = self.state.lock().await;
            (
                state.pull_due_at.is_some_and(|due| due <= now),
                state.next_poll_at.is_none_or(|due| due <= now),
            )
        };
        if poll_due {
            self.requeue_pending().await?;
        }
        if (pull_due || poll_due) && report.pull.is_none() {
            report.pull = Some(self.pull().await?);
        }

        Ok(report)
    }
}

/// Build push items for `user_id`.
///
/// Conversations owned by another account and evicted payloads stay queued;
/// ids with nothing left locally are dropped from the pending set.
fn collect_push_items(
    store: &ConversationStore,
    user_id: &str,
    ids: &[ConversationId],
) -> Result<Vec<ConversationPushItem>> {
    let tombstones = store.read_tombstones()?;
    let known = store.read_remote_known(user_id)?;
    let foreign = store.read_remote_known_elsewhere(user_id)?;
    let mut items = Vec::with_capacity(ids.len());

    for id in ids {
        if foreign.contains(id) && !known.contains(id) {
            tracing::debug!("Not pushing {id} for {user_id}; it belongs to another account");
            continue;
        }
        if let Some(tombstone) = tombstones.iter().find(|tombstone| &tombstone.id == id) {
            items.push(ConversationPushItem::tombstone(tombstone));
            continue;
        }

        let meta = store.read_meta(id)?;
        let payload = store.read_payload(id)?;
        match (meta, payload) {
            (Some(meta), Some(payload)) => {
                items.push(ConversationPushItem::content(&meta, payload));
            }
            (Some(_), None) => {
                tracing::debug!("Payload of {id} is not cached; keeping it queued");
            }
            (None, _) => {
                tracing::debug!("Nothing to push for {id}; dropping it from the queue");
                store.clear_pending_push(id)?;
            }
        }
    }

    Ok(items)
}

/// Record a successful push. Returns ids changed locally while it was in flight.
fn acknowledge_push(
    store: &ConversationStore,
    user_id: &str,
    items: &[ConversationPushItem],
) -> Result<BTreeSet<ConversationId>> {
    let mut still_pending = BTreeSet::new();

    for item in items {
        let Ok(id) = item.id.parse::<ConversationId>() else {
            continue;
        };

        if item.deleted {
            store.remove_tombstone(&id)?;
            store.clear_pending_push(&id)?;
            store.set_remote_known(user_id, &id, false)?;
            continue;
        }

        store.set_remote_known(user_id, &id, true)?;
        let unchanged = store
            .read_meta(&id)?
            .is_some_and(|meta| meta.updated_at == item.updated_at);
        if unchanged {
            store.clear_pending_push(&id)?;
        } else {
            still_pending.insert(id);
        }
    }

    Ok(still_pending)
}

fn decode_payload(record: &RemoteRecord) -> Option<ConversationPayload> {
    let Some(raw) = record.payload.clone() else {
        tracing::warn!("Skipping remote record {} without payload", record.id);
        return None;
    };
    match serde_json::from_value::<ConversationPayload>(raw) {
        Ok(payload) if payload.is_consistent() => Some(payload),
        Ok(_) => {
            tracing::warn!(
                "Skipping remote record {} with inconsistent diagram history",
                record.id
            );
            None
        }
        Err(error) => {
            tracing::warn!("Skipping remote record {} with corrupt payload: {error}", record.id);
            None
        }
    }
}
