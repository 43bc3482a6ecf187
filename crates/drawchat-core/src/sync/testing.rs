//! In-memory remote store shared by sync tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::models::{ConversationPushItem, PullResponse, PushResponse, RemoteRecord, SyncCursor};

/// Server keeping one record per id, each stamped with a change sequence.
#[derive(Default)]
pub struct MockServer {
    inner: Mutex<ServerState>,
}

#[derive(Default)]
struct ServerState {
    seq: u64,
    records: BTreeMap<String, (u64, RemoteRecord)>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a record as if another client had pushed it.
    pub fn insert(&self, record: RemoteRecord) {
        let mut state = self.inner.lock().unwrap();
        state.seq += 1;
        let seq = state.seq;
        state.records.insert(record.id.clone(), (seq, record));
    }

    pub fn record(&self, id: &str) -> Option<RemoteRecord> {
        let state = self.inner.lock().unwrap();
        state.records.get(id).map(|(_, record)| record.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    fn accept(&self, items: &[ConversationPushItem]) -> PushResponse {
        for item in items {
            self.insert(RemoteRecord {
                id: item.id.clone(),
                title: item.title.clone(),
                created_at: item.created_at,
                updated_at: item.updated_at,
                deleted: item.deleted,
                payload: item
                    .payload
                    .as_ref()
                    .map(|payload| serde_json::to_value(payload).unwrap()),
            });
        }
        let state = self.inner.lock().unwrap();
        PushResponse {
            cursor: SyncCursor::new(state.seq.to_string()),
        }
    }

    fn since(&self, cursor: Option<&SyncCursor>, limit: usize) -> PullResponse {
        let after = cursor
            .and_then(|cursor| cursor.as_str().parse::<u64>().ok())
            .unwrap_or(0);
        let state = self.inner.lock().unwrap();
        let mut changed: Vec<&(u64, RemoteRecord)> = state
            .records
            .values()
            .filter(|(seq, _)| *seq > after)
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);
        changed.truncate(limit);

        let last = changed.last().map_or(after, |(seq, _)| *seq);
        PullResponse {
            conversations: changed.into_iter().map(|(_, record)| record.clone()).collect(),
            cursor: SyncCursor::new(last.to_string()),
        }
    }
}

/// Client handle to a [`MockServer`] with call counters and failure switch.
pub struct MockRemote {
    server: Mutex<Arc<MockServer>>,
    pub push_calls: AtomicUsize,
    pub pull_calls: AtomicUsize,
    pub pushed: Mutex<Vec<ConversationPushItem>>,
    fail: AtomicBool,
}

impl MockRemote {
    pub fn new(server: Arc<MockServer>) -> Self {
        Self {
            server: Mutex::new(server),
            push_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
            pushed: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Talk to another account's server from now on.
    pub fn switch_server(&self, server: Arc<MockServer>) {
        *self.server.lock().unwrap() = server;
    }

    fn server(&self) -> Arc<MockServer> {
        self.server.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn pushed_items(&self) -> Vec<ConversationPushItem> {
        self.pushed.lock().unwrap().clone()
    }
}

impl RemoteStore for MockRemote {
    async fn push(&self, conversations: &[ConversationPushItem]) -> RemoteResult<PushResponse> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Api("service unavailable (503)".to_string()));
        }
        self.pushed
            .lock()
            .unwrap()
            .extend(conversations.iter().cloned());
        Ok(self.server().accept(conversations))
    }

    async fn pull(&self, cursor: Option<&SyncCursor>, limit: usize) -> RemoteResult<PullResponse> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Api("service unavailable (503)".to_string()));
        }
        Ok(self.server().since(cursor, limit))
    }
}
