use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::stream::SSE_KEEPALIVE_FRAME;

const QUEUE_CAPACITY: usize = 64;

/// Aborts the reader task when the delivery side is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Decouples caller delivery from upstream pacing.
///
/// A background reader moves items from the source into a bounded queue.
/// Delivery waits at most `interval` for the next item and emits a keepalive
/// frame whenever that wait elapses. An error item is delivered and ends the
/// stream.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatDecoupler {
    interval: Duration,
}

impl HeartbeatDecoupler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn wrap<S, E>(&self, source: S) -> impl Stream<Item = Result<Bytes, E>> + Send + 'static
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Result<Bytes, E>>(QUEUE_CAPACITY);
        let reader = tokio::spawn(async move {
            let mut source = Box::pin(source);
            while let Some(item) = source.next().await {
                let is_err = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!(event = "heartbeat_receiver_dropped");
                    return;
                }
                if is_err {
                    return;
                }
            }
        });
        let guard = AbortOnDrop(reader);
        let interval = self.interval;

        stream::unfold(
            (rx, guard, false),
            move |(mut rx, guard, finished)| async move {
                if finished {
                    return None;
                }
                match tokio::time::timeout(interval, rx.recv()).await {
                    Ok(Some(Ok(frame))) => Some((Ok(frame), (rx, guard, false))),
                    Ok(Some(Err(err))) => Some((Err(err), (rx, guard, true))),
                    Ok(None) => None,
                    Err(_) => Some((
                        Ok(Bytes::from_static(SSE_KEEPALIVE_FRAME)),
                        (rx, guard, false),
                    )),
                }
            },
        )
    }
}
