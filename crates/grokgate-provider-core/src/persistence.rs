use async_trait::async_trait;

use crate::credential::StatusMap;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("status store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("status store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("status store closed")]
    Closed,
}

/// Opaque load/save of the status map.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn load(&self) -> Result<StatusMap, PersistenceError>;
    async fn save(&self, map: &StatusMap) -> Result<(), PersistenceError>;
}

/// Receives status snapshots after pool mutations. Delivery is best-effort.
///
/// `submit` runs while the pool lock is held: implementations hand the
/// snapshot off (a channel send) and never call back into the pool.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn submit(&self, snapshot: StatusMap);
}

/// Sink that drops every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatusSink;

#[async_trait]
impl StatusSink for NullStatusSink {
    async fn submit(&self, _snapshot: StatusMap) {}
}
