// ── Reactive record collection ──
//
// Concurrent storage with O(1) lookups and push-based change notification
// via `watch` channels. Writes come from a single reconciler; reads can
// happen anywhere.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::watch;

use dashsync_api::OrderingMarker;

use crate::model::Record;

/// Shared, immutable view of every record in a collection, ordered by id.
pub type Snapshot = Arc<Vec<Arc<Record>>>;

/// A bounded, reactive collection of [`Record`]s keyed by id.
///
/// Besides live records it keeps tombstones (the ordering marker of the
/// last delete per id) so a late, older create cannot resurrect a record.
/// Live records and tombstones share the `max_entries` bound. Tombstones
/// are evicted first, oldest marker first; a live record is only evicted
/// when live records alone exceed the bound. The newest evicted marker is
/// kept as a floor below which nothing is admitted again.
pub(crate) struct RecordCollection {
    by_id: DashMap<String, Arc<Record>>,

    /// id -> marker of the delete that removed it.
    tombstones: DashMap<String, OrderingMarker>,

    max_entries: Option<usize>,

    /// Newest marker of any evicted live record.
    eviction_floor: Mutex<Option<OrderingMarker>>,

    /// Version counter, bumped on every visible mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation for efficient subscription.
    snapshot: watch::Sender<Snapshot>,
}

impl RecordCollection {
    pub(crate) fn new(max_entries: Option<usize>) -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_id: DashMap::new(),
            tombstones: DashMap::new(),
            max_entries,
            eviction_floor: Mutex::new(None),
            version,
            snapshot,
        }
    }

    /// Insert or replace a record, clearing any tombstone for its id.
    /// Returns the ids evicted to stay within the bound.
    pub(crate) fn upsert(&self, record: Record) -> Vec<String> {
        self.tombstones.remove(&record.id);
        self.by_id.insert(record.id.clone(), Arc::new(record));

        let evicted = self.enforce_bound();
        self.publish();
        evicted
    }

    /// Remove a record and leave a tombstone at `marker`.
    pub(crate) fn remove(&self, id: &str, marker: OrderingMarker) -> Option<Arc<Record>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        self.bury(id, marker);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Record a delete for an id without touching live records. Keeps the
    /// newest marker when one is already present.
    pub(crate) fn bury(&self, id: &str, marker: OrderingMarker) {
        self.tombstones
            .entry(id.to_owned())
            .and_modify(|existing| *existing = (*existing).max(marker))
            .or_insert(marker);
        if !self.enforce_bound().is_empty() {
            self.publish();
        }
    }

    /// Whether `marker` is at or below the newest evicted marker.
    pub(crate) fn below_eviction_floor(&self, marker: OrderingMarker) -> bool {
        self.floor().is_some_and(|floor| marker <= floor)
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn tombstone(&self, id: &str) -> Option<OrderingMarker> {
        self.tombstones.get(id).map(|m| *m.value())
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Evict until live records plus tombstones fit: oldest tombstone
    /// first, oldest live record only once no tombstones remain.
    fn enforce_bound(&self) -> Vec<String> {
        let Some(max) = self.max_entries else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        while self.by_id.len() + self.tombstones.len() > max {
            let oldest_tombstone = self
                .tombstones
                .iter()
                .map(|t| (*t.value(), t.key().clone()))
                .min();
            if let Some((_, id)) = oldest_tombstone {
                self.tombstones.remove(&id);
                continue;
            }

            let oldest_record = self
                .by_id
                .iter()
                .map(|r| (r.value().version, r.key().clone()))
                .min();
            let Some((marker, id)) = oldest_record else {
                break;
            };
            self.by_id.remove(&id);
            self.raise_floor(marker);
            evicted.push(id);
        }
        evicted
    }

    fn floor(&self) -> Option<OrderingMarker> {
        *self
            .eviction_floor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn raise_floor(&self, marker: OrderingMarker) {
        let mut floor = self
            .eviction_floor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *floor = Some(floor.map_or(marker, |f| f.max(marker)));
    }

    /// Rebuild the id-ordered snapshot and bump the version.
    fn publish(&self) {
        let mut values: Vec<Arc<Record>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, version: i64) -> Record {
        Record::new(id, OrderingMarker::new(version), json!({ "v": version }))
    }

    #[test]
    fn upsert_and_get() {
        let col = RecordCollection::new(None);
        col.upsert(record("a", 1));
        assert_eq!(col.get("a").unwrap().version, OrderingMarker::new(1));
        assert_eq!(col.len(), 1);
        assert_eq!(col.version(), 1);
    }

    #[test]
    fn remove_leaves_tombstone() {
        let col = RecordCollection::new(None);
        col.upsert(record("a", 1));

        let removed = col.remove("a", OrderingMarker::new(5));
        assert_eq!(removed.unwrap().id, "a");
        assert!(col.get("a").is_none());
        assert_eq!(col.tombstone("a"), Some(OrderingMarker::new(5)));
        assert!(col.snapshot().is_empty());
    }

    #[test]
    fn bury_keeps_newest_marker() {
        let col = RecordCollection::new(None);
        col.bury("a", OrderingMarker::new(9));
        col.bury("a", OrderingMarker::new(3));
        assert_eq!(col.tombstone("a"), Some(OrderingMarker::new(9)));
        // No visible change, no version bump.
        assert_eq!(col.version(), 0);
    }

    #[test]
    fn upsert_clears_tombstone() {
        let col = RecordCollection::new(None);
        col.bury("a", OrderingMarker::new(2));
        col.upsert(record("a", 3));
        assert_eq!(col.tombstone("a"), None);
        assert_eq!(col.tombstone_count(), 0);
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let col = RecordCollection::new(None);
        col.upsert(record("c", 1));
        col.upsert(record("a", 2));
        col.upsert(record("b", 3));

        let ids: Vec<_> = col.snapshot().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn bound_evicts_oldest_marker() {
        let col = RecordCollection::new(Some(2));
        col.upsert(record("a", 10));
        col.upsert(record("b", 5));
        let evicted = col.upsert(record("c", 20));

        assert_eq!(evicted, ["b"]);
        assert!(col.get("b").is_none());
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn tombstones_share_the_bound() {
        let col = RecordCollection::new(Some(2));
        col.upsert(record("a", 10));
        col.remove("a", OrderingMarker::new(11));
        col.upsert(record("b", 12));
        let evicted = col.upsert(record("c", 13));

        // The tombstone at 11 is the oldest entry; it goes first.
        assert!(evicted.is_empty());
        assert_eq!(col.tombstone("a"), None);
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn tombstone_never_evicts_a_live_record() {
        let col = RecordCollection::new(Some(1));
        col.upsert(record("a", 1));
        let version = col.version();

        col.bury("ghost", OrderingMarker::new(5));

        assert!(col.get("a").is_some());
        assert_eq!(col.snapshot().len(), 1);
        assert_eq!(col.tombstone_count(), 0);
        assert_eq!(col.version(), version);
    }

    #[test]
    fn eviction_raises_floor_and_republishes() {
        let col = RecordCollection::new(Some(2));
        col.upsert(record("a", 10));
        col.upsert(record("b", 20));
        let evicted = col.upsert(record("c", 30));

        assert_eq!(evicted, ["a"]);
        let ids: Vec<_> = col.snapshot().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, ["b", "c"]);
        assert!(col.below_eviction_floor(OrderingMarker::new(10)));
        assert!(!col.below_eviction_floor(OrderingMarker::new(11)));
    }

    #[tokio::test]
    async fn subscribers_see_mutations() {
        let col = RecordCollection::new(None);
        let mut rx = col.subscribe();

        col.upsert(record("a", 1));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}
