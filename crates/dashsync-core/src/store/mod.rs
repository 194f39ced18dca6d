// ── Reactive record store ──
//
// Bounded record storage with push-based change notification, and the
// reconciler that is its only writer.

mod collection;
mod reconciler;

pub use collection::Snapshot;
pub use reconciler::{ApplyOutcome, Reconciler};
