// dashsync-core: record reconciliation and the SyncClient facade over dashsync-api.

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{SyncClient, TopicSubscription, UpdateHandler};
pub use config::SyncConfig;
pub use error::CoreError;
pub use model::{Record, RecordChange};
pub use store::{ApplyOutcome, Reconciler, Snapshot};
pub use stream::{RecordStream, RecordWatchStream};

// Transport types callers need alongside the facade.
pub use dashsync_api::{
    ChannelState, Credential, CredentialStore, Endpoint, ExchangeResult, Failure, FailureKind,
    RequestOptions, Validation,
};
