// ── Domain model ──

mod record;

pub use record::{Record, RecordChange};
