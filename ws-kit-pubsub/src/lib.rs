//! In-process pub/sub plugin for `ws-kit-core`: topic contract, per-connection
//! subscriptions, and `ctx.publish`/`ctx.topics`.
//!
//! Installing [`plugin::PubSubPlugin`] grants the `pubsub` capability and
//! stashes its adapter/registry on every context; [`ext::PubSubContextExt`]
//! is the resulting public surface on `Context<S>`.

pub mod config;
pub mod ext;
pub mod plugin;
pub mod registry;
pub mod topics;

pub use config::{TopicLimits, TopicRejectReason};
pub use ext::{PubSubContextExt, PublishErr, PublishOk, PublishOpts, PublishResult};
pub use plugin::PubSubPlugin;
pub use topics::{AuthorizeHook, LifecycleHook, NormalizeHook, TopicHooks, Topics};
