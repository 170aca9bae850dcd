//! Request orchestration for grokgate: upstream HTTP, credential failover,
//! response framing and keepalive delivery.

pub mod bootstrap;
pub mod dispatch;
pub mod heartbeat;
pub mod state;
pub mod stream;
pub mod upstream_client;

pub use bootstrap::{bootstrap, configured_credentials};
pub use dispatch::{Dispatched, Dispatcher, DispatcherConfig};
pub use heartbeat::HeartbeatDecoupler;
pub use state::{ChatOutput, FrameStream, GatewayState};
pub use stream::{ImageContext, ResponseMeta, SSE_DONE_FRAME, SSE_KEEPALIVE_FRAME, sse_json_bytes};
pub use upstream_client::{UpstreamClientConfig, WreqUpstreamClient};
