//! Lifecycle wrapper around a [`SyncCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{now_millis, SyncCoordinator};
use crate::config::SyncSettings;
use crate::store::Stores;

/// Owns a coordinator and its background sweeper.
///
/// Each instance is fully isolated, so tests can run several side by side.
pub struct SyncService {
    coordinator: Arc<SyncCoordinator>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    pub fn new(stores: Stores, settings: SyncSettings) -> Self {
        Self {
            coordinator: Arc::new(SyncCoordinator::new(stores, settings)),
            sweeper: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Spawn the sweeper. Calling it twice is a no-op.
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }

        let coordinator = self.coordinator.clone();
        let every = coordinator.settings().sweep_interval.max(Duration::from_secs(1));
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                coordinator.sweep(now_millis()).await;
            }
        }));

        tracing::info!(interval_secs = every.as_secs(), "Sync service started");
    }

    /// Stop the sweeper and drop every live connection.
    pub async fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        self.coordinator.disconnect_all();
        tracing::info!("Sync service stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.sweeper.lock().await.is_some()
    }
}

impl Default for SyncService {
    fn default() -> Self {
        Self::new(Stores::in_memory(), SyncSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::MessageSender;
    use cartsync_engine::NetworkProfile;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let service = SyncService::default();
        assert!(!service.is_running().await);

        service.start().await;
        service.start().await;
        assert!(service.is_running().await);

        let (tx, _rx): (MessageSender, _) = mpsc::unbounded_channel();
        service.coordinator().registry().register(
            "user-1",
            "phone",
            Arc::new(tx),
            NetworkProfile::balanced(),
            now_millis(),
        );

        service.stop().await;
        assert!(!service.is_running().await);
        assert_eq!(service.coordinator().registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn instances_are_isolated() {
        let a = SyncService::default();
        let b = SyncService::default();

        let (tx, _rx): (MessageSender, _) = mpsc::unbounded_channel();
        a.coordinator().registry().register(
            "user-1",
            "phone",
            Arc::new(tx),
            NetworkProfile::balanced(),
            now_millis(),
        );

        assert_eq!(a.coordinator().connected_devices("user-1").len(), 1);
        assert!(b.coordinator().connected_devices("user-1").is_empty());
    }
}
