//! Core gateway abstractions for grokgate.
//!
//! This crate does **not** depend on axum or any concrete HTTP client.
//! It owns the credential pool and the types shared by the request path;
//! a higher layer performs IO through [`UpstreamClient`].

pub mod catalog;
pub mod clock;
pub mod credential;
pub mod errors;
pub mod headers;
pub mod model;
pub mod persistence;
pub mod provider;
pub mod quota;

pub use catalog::{ModelCatalog, ModelSpec};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{
    CooldownRecord, Credential, CredentialPool, PoolOptions, StatusMap, Tier, TokenStatus,
};
pub use errors::{GatewayError, GatewayResult};
pub use headers::{Headers, cookie_append, header_get, header_remove, header_set};
pub use model::ModelClass;
pub use persistence::{NullStatusSink, PersistenceError, StatusSink, StatusStore};
pub use provider::{
    BodyChunk, ByteStream, HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind, collect_body,
};
pub use quota::{ModelQuota, QuotaError, QuotaTable};
