//! Background loop driving a [`SyncEngine`] from signals and a timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::engine::SyncEngine;
use super::remote::RemoteStore;
use super::SyncSignal;

pub struct SyncRunner<R> {
    engine: Arc<SyncEngine<R>>,
    signals: mpsc::UnboundedReceiver<SyncSignal>,
    tick_interval: Duration,
}

impl<R: RemoteStore> SyncRunner<R> {
    pub const fn new(
        engine: Arc<SyncEngine<R>>,
        signals: mpsc::UnboundedReceiver<SyncSignal>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            engine,
            signals,
            tick_interval,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    /// Run until [`SyncSignal::Shutdown`] arrives or every sender is dropped.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!("Sync runner started (tick {:?})", self.tick_interval);

        loop {
            tokio::select! {
                signal = self.signals.recv() => {
                    let Some(signal) = signal else {
                        break;
                    };
                    if signal == SyncSignal::Shutdown {
                        break;
                    }
                    if let Err(error) = self.engine.handle_signal(signal).await {
                        tracing::warn!("Failed to handle sync signal: {error}");
                    }
                    self.tick().await;
                }
                _ = interval.tick() => self.tick().await,
            }
        }

        tracing::debug!("Sync runner stopped");
    }

    async fn tick(&self) {
        if let Err(error) = self.engine.tick().await {
            tracing::warn!("Sync tick failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::models::{ConversationId, ConversationMeta, ConversationPayload};
    use crate::store::ConversationStore;
    use crate::sync::testing::{MockRemote, MockServer};
    use crate::sync::AuthStatus;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn runner_pushes_local_changes_and_stops_on_shutdown() {
        let server = MockServer::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let store = ConversationStore::open_in_memory_with(None, clock.clone()).unwrap();
        let id = ConversationId::new();
        store
            .write_conversation(
                &ConversationMeta::new(id, 1_000),
                &ConversationPayload::default(),
            )
            .unwrap();
        let store = Arc::new(Mutex::new(store));

        let engine = Arc::new(SyncEngine::new(
            store,
            MockRemote::new(server.clone()),
            &StoreConfig::default(),
            clock,
        ));
        let (sender, receiver) = mpsc::unbounded_channel();
        let runner = SyncRunner::new(engine.clone(), receiver, Duration::from_secs(3_600));

        sender
            .send(SyncSignal::AuthChanged(AuthStatus::authenticated("user-1")))
            .unwrap();
        sender
            .send(SyncSignal::LocalChange {
                id,
                immediate: true,
            })
            .unwrap();
        sender.send(SyncSignal::Shutdown).unwrap();

        runner.run().await;

        assert!(server.record(&id.to_string()).is_some());
        assert_eq!(engine.bootstrapped_user().await.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn runner_exits_when_senders_drop() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(Mutex::new(
            ConversationStore::open_in_memory_with(None, clock.clone()).unwrap(),
        ));
        let engine = Arc::new(SyncEngine::new(
            store,
            MockRemote::new(MockServer::new()),
            &StoreConfig::default(),
            clock,
        ));
        let (sender, receiver) = mpsc::unbounded_channel::<SyncSignal>();
        drop(sender);

        SyncRunner::new(engine.clone(), receiver, Duration::from_secs(3_600))
            .run()
            .await;
        assert_eq!(engine.remote().pulls(), 0);
    }
}
