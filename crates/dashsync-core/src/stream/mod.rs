// ── Reactive record streams ──
//
// Subscription types for consuming collection changes from a reconciler.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Record;
use crate::store::Snapshot;

/// A subscription to one topic's record collection.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via [`changed`](Self::changed) or by converting to a
/// `Stream`.
pub struct RecordStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl RecordStream {
    pub(crate) fn new(mut receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// Snapshot as of the last `changed()` (or creation).
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Latest snapshot, which may be newer than `current()`.
    pub fn latest(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    /// Look up one record in the latest snapshot.
    pub fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.receiver
            .borrow()
            .iter()
            .find(|r| r.id == id)
            .map(Arc::clone)
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the reconciler has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> RecordWatchStream {
        RecordWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding a fresh snapshot on every collection change
/// (starting with the current one).
pub struct RecordWatchStream {
    inner: WatchStream<Snapshot>,
}

impl Stream for RecordWatchStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use dashsync_api::{LiveEnvelope, OrderingMarker, UpdateKind};

    use crate::store::Reconciler;

    fn created(id: &str, ts: i64) -> LiveEnvelope {
        LiveEnvelope {
            topic: "t".into(),
            kind: UpdateKind::Created,
            timestamp: OrderingMarker::new(ts),
            record_id: id.into(),
            payload: Some(json!({ "id": id })),
        }
    }

    #[tokio::test]
    async fn changed_tracks_reconciliation() {
        let reconciler = Reconciler::new("t", None);
        let mut stream = reconciler.stream();
        assert!(stream.current().is_empty());

        reconciler.apply(&created("a", 1));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.get("a").unwrap().version, OrderingMarker::new(1));
    }

    #[tokio::test]
    async fn into_stream_yields_current_then_changes() {
        let reconciler = Reconciler::new("t", None);
        reconciler.apply(&created("a", 1));
        let mut stream = reconciler.stream().into_stream();

        assert_eq!(stream.next().await.unwrap().len(), 1);
        reconciler.apply(&created("b", 2));
        assert_eq!(stream.next().await.unwrap().len(), 2);
    }
}
