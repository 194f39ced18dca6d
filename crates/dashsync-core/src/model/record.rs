// ── Tracked records ──
//
// A record is created, mutated, and removed only through reconciliation.
// Callers observe immutable `Arc<Record>` snapshots.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use dashsync_api::OrderingMarker;

use crate::store::ApplyOutcome;

/// One tracked entity (a report, an alert, ...) as last reconciled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    /// Ordering marker of the envelope that last changed this record.
    pub version: OrderingMarker,
    pub payload: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, version: OrderingMarker, payload: Value) -> Self {
        Self {
            id: id.into(),
            version,
            payload,
        }
    }

    /// Top-level payload field, if the payload is an object carrying it.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// Notification delivered to handlers after an envelope changed the
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordChange {
    pub topic: String,
    pub record_id: String,
    pub outcome: ApplyOutcome,
    /// Ordering marker of the envelope that caused the change.
    pub version: OrderingMarker,
    /// State after the change; `None` once removed.
    pub record: Option<Arc<Record>>,
}

impl RecordChange {
    pub fn is_removal(&self) -> bool {
        self.outcome == ApplyOutcome::Removed
    }
}
