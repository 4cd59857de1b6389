//! Convenience re-exports for downstream crates and application code.

pub use crate::adapter::{MatchCapability, ParseOutcome, PublishAck, PubSubAdapter, TransportHandle, Validator};
pub use crate::connection::{ClientId, ConnectionRegistry, ConnectionState};
pub use crate::context::{Context, Enhancer, EnhancerChain, Extensions};
pub use crate::dispatch::{Dispatcher, Handler, Middleware, Next};
pub use crate::envelope::{Envelope, InboundMeta, OutboundFrame, OutboundMeta};
pub use crate::error::{ErrorCode, RouteConflict, RouterError};
pub use crate::lifecycle::{LifecycleManager, Observer};
pub use crate::plugin::{CapabilitySet, Plugin};
pub use crate::route::{MergePolicy, RouteEntry, RouteTable};
pub use crate::router::{Router, WebSocketBridge};
pub use crate::rpc::{ActiveRpc, RpcManager};
pub use crate::schema::{MessageSchema, RpcSchema, SchemaDescriptor, SchemaId, SchemaKind, SchemaOpts};
pub use crate::config::{RouterConfig, RpcConfig};
pub use crate::BoxFuture;
