// dashsync-api: resilient request executor + auto-reconnecting live-update channel.

pub mod auth;
pub mod backoff;
pub mod classify;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod schema;
pub mod transport;
pub mod websocket;

pub use auth::{Credential, CredentialStore};
pub use backoff::BackoffPolicy;
pub use classify::{AttemptOutcome, FailureKind, classify};
pub use endpoint::{Endpoint, RequestOptions};
pub use envelope::{EnvelopeError, LiveEnvelope, OrderingMarker, UpdateKind};
pub use error::Error;
pub use executor::{ExchangeResult, ExecutorConfig, Failure, RequestExecutor};
pub use schema::{Field, FieldIssue, FieldKind, IssueKind, Schema, SchemaError, Validation, validate};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    ChannelEvent, ChannelState, CloseReason, Connector, Frame, FrameStream, LiveChannel, LiveEvents,
    ReconnectConfig, Subscription, SubscriptionHandle, WsConnector,
};
