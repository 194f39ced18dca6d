// ── State reconciler ──
//
// Applies live-update envelopes to a record collection. The ordering
// marker is the only source of truth for conflict resolution; transport
// order is never trusted. Never blocks, never performs I/O.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use dashsync_api::{LiveEnvelope, OrderingMarker, UpdateKind};

use super::collection::{RecordCollection, Snapshot};
use crate::model::Record;
use crate::stream::RecordStream;

/// What applying one envelope did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApplyOutcome {
    /// A new record was added.
    Inserted,
    /// A `created` with a newer marker overwrote the stored record.
    Replaced,
    /// An `updated` merged its fields into the stored record.
    Merged,
    Removed,
    /// The envelope's marker is older than what is stored; discarded.
    Stale,
    /// Same marker as the stored record; redelivery, discarded.
    Duplicate,
    /// `deleted` for an id that is not present; no-op apart from the
    /// tombstone.
    AbsentDelete,
    /// Accepted, then immediately evicted as the oldest entry at the bound.
    Evicted,
}

impl ApplyOutcome {
    /// Whether observers should be notified.
    pub fn changed(self) -> bool {
        matches!(
            self,
            Self::Inserted | Self::Replaced | Self::Merged | Self::Removed
        )
    }
}

/// Single-writer reconciler for one topic's collection.
///
/// `apply` takes `&self` (the collection is internally synchronized) but
/// ordering is only guaranteed when one task drives it; `SyncClient` runs
/// exactly one per topic.
pub struct Reconciler {
    topic: String,
    collection: RecordCollection,
}

impl Reconciler {
    /// `max_records` bounds live records plus tombstones; `None` is
    /// unbounded.
    pub fn new(topic: impl Into<String>, max_records: Option<usize>) -> Self {
        Self {
            topic: topic.into(),
            collection: RecordCollection::new(max_records),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Apply one envelope.
    pub fn apply(&self, envelope: &LiveEnvelope) -> ApplyOutcome {
        let id = envelope.record_id.as_str();
        let marker = envelope.timestamp;

        let outcome = match envelope.kind {
            UpdateKind::Created => self.apply_created(id, marker, envelope.payload.as_ref()),
            UpdateKind::Updated => self.apply_updated(id, marker, envelope.payload.as_ref()),
            UpdateKind::Deleted => self.apply_deleted(id, marker),
        };

        if outcome.changed() {
            debug!(topic = %self.topic, record_id = id, %marker, %outcome, "Reconciled envelope");
        } else {
            trace!(topic = %self.topic, record_id = id, %marker, %outcome, "Envelope discarded");
        }
        outcome
    }

    pub fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.collection.get(id)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.collection.snapshot()
    }

    /// Subscribe to collection changes.
    pub fn stream(&self) -> RecordStream {
        RecordStream::new(self.collection.subscribe())
    }

    /// Bumped on every visible change.
    pub fn version(&self) -> u64 {
        self.collection.version()
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.len() == 0
    }

    // ── Per-kind rules ───────────────────────────────────────────────

    fn apply_created(&self, id: &str, marker: OrderingMarker, payload: Option<&Value>) -> ApplyOutcome {
        let payload = payload.cloned().unwrap_or(Value::Null);

        match self.collection.get(id) {
            Some(stored) => match marker.cmp(&stored.version) {
                std::cmp::Ordering::Greater => {
                    self.store(Record::new(id, marker, payload), ApplyOutcome::Replaced)
                }
                std::cmp::Ordering::Equal => ApplyOutcome::Duplicate,
                std::cmp::Ordering::Less => ApplyOutcome::Stale,
            },
            None => self.insert_unless_buried(id, marker, payload),
        }
    }

    fn apply_updated(&self, id: &str, marker: OrderingMarker, payload: Option<&Value>) -> ApplyOutcome {
        let patch = payload.cloned().unwrap_or(Value::Null);

        match self.collection.get(id) {
            Some(stored) => match marker.cmp(&stored.version) {
                std::cmp::Ordering::Greater => {
                    let mut merged = stored.payload.clone();
                    merge(&mut merged, patch);
                    self.store(Record::new(id, marker, merged), ApplyOutcome::Merged)
                }
                std::cmp::Ordering::Equal => ApplyOutcome::Duplicate,
                std::cmp::Ordering::Less => ApplyOutcome::Stale,
            },
            // An update for a record we never saw carries the best state
            // available.
            None => self.insert_unless_buried(id, marker, patch),
        }
    }

    fn apply_deleted(&self, id: &str, marker: OrderingMarker) -> ApplyOutcome {
        match self.collection.get(id) {
            Some(stored) if marker < stored.version => ApplyOutcome::Stale,
            Some(_) => {
                self.collection.remove(id, marker);
                ApplyOutcome::Removed
            }
            None => {
                self.collection.bury(id, marker);
                ApplyOutcome::AbsentDelete
            }
        }
    }

    fn insert_unless_buried(&self, id: &str, marker: OrderingMarker, payload: Value) -> ApplyOutcome {
        if let Some(deleted_at) = self.collection.tombstone(id) {
            if marker <= deleted_at {
                return ApplyOutcome::Stale;
            }
        }
        // The id may have been evicted; an envelope this old must not bring
        // it back.
        if self.collection.below_eviction_floor(marker) {
            return ApplyOutcome::Stale;
        }
        self.store(Record::new(id, marker, payload), ApplyOutcome::Inserted)
    }

    /// Upsert and report `applied`, or `Evicted` when the record itself
    /// did not survive the bound.
    fn store(&self, record: Record, applied: ApplyOutcome) -> ApplyOutcome {
        let id = record.id.clone();
        let evicted = self.collection.upsert(record);
        if evicted.is_empty() {
            return applied;
        }
        debug!(topic = %self.topic, evicted = ?evicted, "Evicted oldest records to stay within bound");
        if evicted.contains(&id) {
            ApplyOutcome::Evicted
        } else {
            applied
        }
    }
}

/// Shallow merge: top-level keys of `patch` overwrite those of `base`.
/// A non-object on either side replaces `base` wholesale.
fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
        }
        (base, patch) => *base = patch,
    }
}
