//! Cache quota manager
//!
//! Keeps the number of locally cached conversation payloads under a per-tier
//! cap. Stale entries go first regardless of pressure, then the
//! least-recently-updated ones until the cap holds. The open conversation and
//! queued deletions are never evicted, nor, for a signed-in user, are
//! conversations with unpushed local changes. An evicted conversation that
//! keeps its meta is marked so it can be restored from the remote before it
//! is edited again.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::QuotaConfig;
use crate::error::Result;
use crate::models::{ConversationId, ConversationMeta, ConversationPayload};
use crate::store::ConversationStore;

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Conversations with a locally stored payload
    pub cached: usize,
    pub quota: usize,
    pub stale_count: usize,
    /// Cached conversations that also have a known remote copy
    pub remote_backed: usize,
    pub usage_percentage: f64,
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub stale_removed: usize,
    pub quota_removed: usize,
    pub total_removed: usize,
}

/// Applies [`QuotaConfig`] to a [`ConversationStore`].
#[derive(Debug, Clone, Copy)]
pub struct CacheQuotaManager {
    config: QuotaConfig,
}

impl CacheQuotaManager {
    pub const fn new(config: QuotaConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn cache_stats(
        &self,
        store: &ConversationStore,
        user_id: Option<&str>,
        is_authenticated: bool,
    ) -> Result<CacheStats> {
        let now = store.now_ms();
        let cached = cached_metas(store)?;
        let remote_known = remote_known(store, user_id, is_authenticated)?;
        let quota = self.config.max_conversations(is_authenticated);

        let stale_count = cached
            .iter()
            .filter(|meta| self.is_stale(meta, now))
            .count();
        let remote_backed = cached
            .iter()
            .filter(|meta| remote_known.contains(&meta.id))
            .count();

        Ok(CacheStats {
            cached: cached.len(),
            quota,
            stale_count,
            remote_backed,
            usage_percentage: usage_percentage(cached.len(), quota),
        })
    }

    /// Evict stale entries, then the least-recently-updated until under quota.
    pub fn smart_cache_cleanup(
        &self,
        store: &ConversationStore,
        current: Option<&ConversationId>,
        user_id: Option<&str>,
        is_authenticated: bool,
    ) -> Result<CleanupReport> {
        let protected: Vec<ConversationId> = current.into_iter().copied().collect();
        self.cleanup(store, &protected, user_id, is_authenticated)
    }

    /// Persist a conversation; on a storage quota error run one cleanup pass
    /// and retry once.
    ///
    /// Both the written conversation and `current` survive the cleanup.
    pub fn write_with_cleanup(
        &self,
        store: &ConversationStore,
        meta: &ConversationMeta,
        payload: &ConversationPayload,
        current: Option<&ConversationId>,
        user_id: Option<&str>,
        is_authenticated: bool,
    ) -> Result<()> {
        match store.write_conversation(meta, payload) {
            Err(error) if error.is_quota_exceeded() => {
                tracing::warn!(
                    "Write of conversation {} hit the storage quota ({error}); cleaning up and retrying",
                    meta.id
                );
                let mut protected = vec![meta.id];
                protected.extend(current.copied());
                self.cleanup(store, &protected, user_id, is_authenticated)?;
                store.write_conversation(meta, payload)
            }
            other => other,
        }
    }

    fn cleanup(
        &self,
        store: &ConversationStore,
        protected: &[ConversationId],
        user_id: Option<&str>,
        is_authenticated: bool,
    ) -> Result<CleanupReport> {
        let now = store.now_ms();
        let quota = self.config.max_conversations(is_authenticated);
        let remote_known = remote_known(store, user_id, is_authenticated)?;

        let mut protected: BTreeSet<ConversationId> = protected.iter().copied().collect();
        // Signed out, nothing drains the push queue and the tier cap applies
        if is_authenticated {
            protected.extend(store.read_pending_pushes()?);
        }
        protected.extend(store.read_tombstones()?.into_iter().map(|tombstone| tombstone.id));

        let mut cached = cached_metas(store)?;
        // Oldest first so quota eviction can take from the front
        cached.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

        let evictable = |meta: &ConversationMeta| !protected.contains(&meta.id);
        let (stale, mut fresh): (Vec<_>, Vec<_>) = cached
            .into_iter()
            .partition(|meta| evictable(meta) && self.is_stale(meta, now));

        let mut victims: Vec<ConversationId> = stale.iter().map(|meta| meta.id).collect();
        let stale_removed = victims.len();

        let mut over = fresh.len().saturating_sub(quota);
        fresh.retain(|meta| {
            if over > 0 && evictable(meta) {
                victims.push(meta.id);
                over -= 1;
                false
            } else {
                true
            }
        });
        let quota_removed = victims.len() - stale_removed;

        if victims.is_empty() {
            return Ok(CleanupReport::default());
        }

        for id in &victims {
            store.remove_payload(id)?;
        }

        let dropped: BTreeSet<ConversationId> = victims
            .iter()
            .filter(|id| !remote_known.contains(id))
            .copied()
            .collect();
        if !dropped.is_empty() {
            let mut metas = store.read_metas()?;
            metas.retain(|meta| !dropped.contains(&meta.id));
            store.write_metas(&metas)?;
        }
        let kept: BTreeSet<ConversationId> = victims
            .iter()
            .filter(|id| !dropped.contains(id))
            .copied()
            .collect();
        store.mark_evicted(&kept)?;

        let report = CleanupReport {
            stale_removed,
            quota_removed,
            total_removed: victims.len(),
        };
        tracing::info!(
            "Cache cleanup removed {} conversations ({} stale, {} over quota {}), kept {} remote pointers",
            report.total_removed,
            report.stale_removed,
            report.quota_removed,
            quota,
            kept.len()
        );
        Ok(report)
    }

    fn is_stale(&self, meta: &ConversationMeta, now_ms: i64) -> bool {
        now_ms.saturating_sub(meta.updated_at) > self.config.stale_after_ms()
    }
}

impl Default for CacheQuotaManager {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}

/// Metas whose payload is present locally.
fn cached_metas(store: &ConversationStore) -> Result<Vec<ConversationMeta>> {
    let payload_ids = store.payload_ids()?;
    Ok(store
        .read_metas()?
        .into_iter()
        .filter(|meta| payload_ids.contains(&meta.id))
        .collect())
}

fn remote_known(
    store: &ConversationStore,
    user_id: Option<&str>,
    is_authenticated: bool,
) -> Result<BTreeSet<ConversationId>> {
    match user_id {
        Some(user_id) if is_authenticated => store.read_remote_known(user_id),
        _ => Ok(BTreeSet::new()),
    }
}

#[allow(clippy::cast_precision_loss)]
fn usage_percentage(cached: usize, quota: usize) -> f64 {
    if quota == 0 {
        return 100.0;
    }
    (cached as f64 / quota as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    const NOW: i64 = 400 * DAY_MS;

    fn setup() -> ConversationStore {
        let clock = Arc::new(ManualClock::new(NOW));
        ConversationStore::open_in_memory_with(None, clock).unwrap()
    }

    fn seed(store: &ConversationStore, updated_at: i64) -> ConversationId {
        let meta = ConversationMeta {
            id: ConversationId::new(),
            created_at: 0,
            updated_at,
            title: None,
        };
        store
            .write_conversation(&meta, &ConversationPayload::default())
            .unwrap();
        meta.id
    }

    fn manager(authenticated_cap: usize) -> CacheQuotaManager {
        CacheQuotaManager::new(QuotaConfig {
            authenticated_max_conversations: authenticated_cap,
            anonymous_max_conversations: 100,
            stale_after_days: 30,
        })
    }

    #[test]
    fn test_stale_first_then_least_recently_updated() {
        let store = setup();
        let stale: Vec<_> = (0..5)
            .map(|i| seed(&store, NOW - (40 + i) * DAY_MS))
            .collect();
        let fresh: Vec<_> = (0..45).map(|i| seed(&store, NOW - 1_000 * (45 - i))).collect();

        let report = manager(40)
            .smart_cache_cleanup(&store, None, Some("u"), true)
            .unwrap();

        assert_eq!(
            report,
            CleanupReport {
                stale_removed: 5,
                quota_removed: 5,
                total_removed: 10,
            }
        );
        let remaining = store.payload_ids().unwrap();
        assert_eq!(remaining.len(), 40);
        assert!(stale.iter().all(|id| !remaining.contains(id)));
        assert!(fresh[..5].iter().all(|id| !remaining.contains(id)));
        assert!(fresh[5..].iter().all(|id| remaining.contains(id)));
    }

    #[test]
    fn test_current_conversation_is_never_evicted() {
        let store = setup();
        let current = seed(&store, NOW - 90 * DAY_MS);
        let others: Vec<_> = (0..3).map(|i| seed(&store, NOW - i)).collect();

        let report = manager(1)
            .smart_cache_cleanup(&store, Some(&current), None, true)
            .unwrap();

        assert_eq!(report.stale_removed, 0);
        assert_eq!(report.quota_removed, 3);
        let remaining = store.payload_ids().unwrap();
        assert!(remaining.contains(&current));
        assert!(others.iter().all(|id| !remaining.contains(id)));
    }

    #[test]
    fn test_authenticated_keeps_meta_for_remote_copies() {
        let store = setup();
        let backed = seed(&store, NOW - 60 * DAY_MS);
        let local_only = seed(&store, NOW - 61 * DAY_MS);
        store.set_remote_known("u", &backed, true).unwrap();

        manager(50)
            .smart_cache_cleanup(&store, None, Some("u"), true)
            .unwrap();

        assert!(store.read_payload(&backed).unwrap().is_none());
        assert!(store.read_meta(&backed).unwrap().is_some());
        assert!(store.read_meta(&local_only).unwrap().is_none());
    }

    #[test]
    fn test_evicted_remote_pointer_is_marked() {
        let store = setup();
        let backed = seed(&store, NOW - 60 * DAY_MS);
        let local_only = seed(&store, NOW - 61 * DAY_MS);
        store.set_remote_known("u", &backed, true).unwrap();

        manager(50)
            .smart_cache_cleanup(&store, None, Some("u"), true)
            .unwrap();

        assert_eq!(store.read_evicted().unwrap(), BTreeSet::from([backed]));
        assert!(!store.is_evicted(&local_only).unwrap());
    }

    #[test]
    fn test_pending_and_tombstoned_conversations_are_never_evicted() {
        let store = setup();
        let pending = seed(&store, NOW - 90 * DAY_MS);
        let deleting = seed(&store, NOW - 80 * DAY_MS);
        let synced: Vec<_> = (0..3).map(|i| seed(&store, NOW - i)).collect();
        for id in synced.iter().chain([&pending, &deleting]) {
            store.set_remote_known("u", id, true).unwrap();
        }
        store.mark_pending_push(&pending).unwrap();
        store
            .add_tombstone(crate::models::Tombstone {
                id: deleting,
                created_at: 0,
                deleted_at: NOW,
            })
            .unwrap();

        let report = manager(1)
            .smart_cache_cleanup(&store, None, Some("u"), true)
            .unwrap();

        assert_eq!(report.stale_removed, 0);
        assert_eq!(report.quota_removed, 3);
        let remaining = store.payload_ids().unwrap();
        assert!(remaining.contains(&pending));
        assert!(remaining.contains(&deleting));
        assert!(synced.iter().all(|id| !remaining.contains(id)));
    }

    #[test]
    fn test_anonymous_cleanup_removes_meta() {
        let store = setup();
        let id = seed(&store, NOW - 60 * DAY_MS);
        store.set_remote_known("u", &id, true).unwrap();

        let report = manager(50)
            .smart_cache_cleanup(&store, None, Some("u"), false)
            .unwrap();

        assert_eq!(report.total_removed, 1);
        assert!(store.read_meta(&id).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_under_quota_is_noop() {
        let store = setup();
        seed(&store, NOW);
        let report = manager(50)
            .smart_cache_cleanup(&store, None, None, false)
            .unwrap();
        assert_eq!(report, CleanupReport::default());
        assert_eq!(store.read_metas().unwrap().len(), 1);
    }

    #[test]
    fn test_cache_stats() {
        let store = setup();
        let backed = seed(&store, NOW - 31 * DAY_MS);
        seed(&store, NOW);
        seed(&store, NOW);
        store.set_remote_known("u", &backed, true).unwrap();

        let stats = manager(4).cache_stats(&store, Some("u"), true).unwrap();
        assert_eq!(stats.cached, 3);
        assert_eq!(stats.quota, 4);
        assert_eq!(stats.stale_count, 1);
        assert_eq!(stats.remote_backed, 1);
        assert!((stats.usage_percentage - 75.0).abs() < f64::EPSILON);

        let anonymous = manager(4).cache_stats(&store, Some("u"), false).unwrap();
        assert_eq!(anonymous.quota, 100);
        assert_eq!(anonymous.remote_backed, 0);
    }

    #[test]
    fn test_remote_pointer_without_payload_is_not_counted() {
        let store = setup();
        let id = seed(&store, NOW);
        store.remove_payload(&id).unwrap();

        let stats = manager(4).cache_stats(&store, None, false).unwrap();
        assert_eq!(stats.cached, 0);
    }

    #[test]
    fn test_write_with_cleanup_frees_space_and_retries() {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = ConversationStore::open_in_memory_with(Some(4_000), clock).unwrap();
        let old = seed(&store, NOW - 90 * DAY_MS);
        let mut filler = ConversationPayload::default();
        filler.xml = "x".repeat(2_500);
        let meta = store.read_meta(&old).unwrap().unwrap();
        store.write_conversation(&meta, &filler).unwrap();

        let fresh = ConversationMeta::new(ConversationId::new(), NOW);
        let mut payload = ConversationPayload::default();
        payload.xml = "y".repeat(2_000);
        assert!(store
            .write_conversation(&fresh, &payload)
            .unwrap_err()
            .is_quota_exceeded());

        manager(50)
            .write_with_cleanup(&store, &fresh, &payload, None, None, false)
            .unwrap();

        assert!(store.read_payload(&old).unwrap().is_none());
        assert_eq!(store.read_payload(&fresh.id).unwrap(), Some(payload));
    }
}
