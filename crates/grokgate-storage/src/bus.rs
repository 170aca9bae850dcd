use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grokgate_provider_core::{PersistenceError, StatusMap, StatusSink, StatusStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time as tokio_time;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct StatusBusConfig {
    pub capacity: usize,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for StatusBusConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            retry_delay: Duration::from_millis(200),
            max_retries: 3,
        }
    }
}

/// Background writer for status snapshots.
///
/// Snapshots queue on a bounded channel; the writer coalesces bursts and only
/// saves the newest one.
pub struct StatusBus {
    tx: mpsc::Sender<StatusMap>,
    _handle: JoinHandle<()>,
}

impl StatusBus {
    pub fn spawn(store: Arc<dyn StatusStore>, config: StatusBusConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let handle = tokio::spawn(status_writer(store, rx, config));
        Self {
            tx,
            _handle: handle,
        }
    }
}

#[async_trait]
impl StatusSink for StatusBus {
    async fn submit(&self, snapshot: StatusMap) {
        if self.tx.send(snapshot).await.is_err() {
            warn!(event = "status_bus_closed", "status snapshot dropped");
        }
    }
}

async fn status_writer(
    store: Arc<dyn StatusStore>,
    mut rx: mpsc::Receiver<StatusMap>,
    config: StatusBusConfig,
) {
    while let Some(mut snapshot) = rx.recv().await {
        while let Ok(newer) = rx.try_recv() {
            snapshot = newer;
        }
        retry_write(
            "status",
            || store.save(&snapshot),
            config.retry_delay,
            config.max_retries,
        )
        .await;
    }
}

async fn retry_write<F, Fut>(
    label: &'static str,
    mut f: F,
    retry_delay: Duration,
    max_retries: u32,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), PersistenceError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(()) => break,
            Err(err) => {
                attempt += 1;
                warn!(event = "storage_write_failed", label, attempt, error = %err);
                if attempt > max_retries {
                    break;
                }
                tokio_time::sleep(retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonFileStore;
    use grokgate_provider_core::TokenStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStore {
        failures_left: AtomicU32,
        saves: AtomicU32,
    }

    #[async_trait]
    impl StatusStore for FlakyStore {
        async fn load(&self) -> Result<StatusMap, PersistenceError> {
            Ok(StatusMap::new())
        }

        async fn save(&self, _map: &StatusMap) -> Result<(), PersistenceError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(PersistenceError::Closed);
            }
            Ok(())
        }
    }

    fn snapshot(count: u64) -> StatusMap {
        let mut map = StatusMap::new();
        map.entry("k".to_string()).or_default().insert(
            "grok-3".to_string(),
            TokenStatus {
                total_request_count: count,
                ..TokenStatus::default()
            },
        );
        map
    }

    #[tokio::test]
    async fn writes_latest_snapshot_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::in_dir(dir.path()));
        let bus = StatusBus::spawn(store.clone(), StatusBusConfig::default());
        for count in 1..=5 {
            bus.submit(snapshot(count)).await;
        }
        let mut loaded = StatusMap::new();
        for _ in 0..50 {
            tokio_time::sleep(Duration::from_millis(20)).await;
            if let Ok(map) = store.load().await
                && map == snapshot(5)
            {
                loaded = map;
                break;
            }
        }
        assert_eq!(loaded, snapshot(5));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        let store = Arc::new(FlakyStore {
            failures_left: AtomicU32::new(100),
            saves: AtomicU32::new(0),
        });
        let bus = StatusBus::spawn(
            store.clone(),
            StatusBusConfig {
                retry_delay: Duration::from_millis(1),
                max_retries: 2,
                ..StatusBusConfig::default()
            },
        );
        bus.submit(snapshot(1)).await;
        for _ in 0..50 {
            tokio_time::sleep(Duration::from_millis(10)).await;
            if store.saves.load(Ordering::SeqCst) >= 3 {
                break;
            }
        }
        tokio_time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.saves.load(Ordering::SeqCst), 3);
    }
}
