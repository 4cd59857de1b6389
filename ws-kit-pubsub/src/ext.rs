//! `ctx.topics()`/`ctx.publish(...)`, gated on the `pubsub` capability.
//!
//! Defined as an extension trait over `ws_kit_core::Context<S>` — legal under
//! Rust's orphan rules because the trait, not the type, is local to this
//! crate.

use std::sync::Arc;

use serde_json::Value;

use ws_kit_core::adapter::{MatchCapability, PubSubAdapter, Validator};
use ws_kit_core::adapter::ParseOutcome;
use ws_kit_core::context::Context;
use ws_kit_core::envelope::{OutboundFrame, OutboundMeta};
use ws_kit_core::error::{ErrorCode, RouterError};
use ws_kit_core::rpc::now_ms;
use ws_kit_core::schema::{MessageSchema, SchemaId};

use crate::config::TopicLimits;
use crate::registry::TopicRegistry;
use crate::topics::{Topics, TopicHooks};

/// Optional per-call overrides for `publish`.
#[derive(Debug, Clone, Default)]
pub struct PublishOpts {
    pub correlation_id: Option<String>,
}

/// Successful publish. `matched` is `None` exactly when
/// `capability == Unknown`.
#[derive(Debug, Clone)]
pub struct PublishOk {
    pub capability: MatchCapability,
    pub matched: Option<u64>,
}

/// The only error variants a publish call can surface to the caller — a
/// strict subset of [`ErrorCode`], matching the discriminated result's
/// closed error set.
#[derive(Debug, Clone)]
pub struct PublishErr {
    pub error: ErrorCode,
    pub retryable: bool,
    pub details: Option<Value>,
}

pub type PublishResult = Result<PublishOk, PublishErr>;

fn publish_err(code: ErrorCode, details: Option<Value>) -> PublishErr {
    PublishErr {
        error: code,
        retryable: code.retryable(),
        details,
    }
}

fn require<S, T: Clone + Send + Sync + 'static>(ctx: &Context<S>, what: &str) -> T {
    ctx.extensions()
        .get::<T>()
        .cloned()
        .unwrap_or_else(|| panic!("ctx.{what}() requires PubSubPlugin to be installed"))
}

pub trait PubSubContextExt {
    /// The per-connection topic subscription handle.
    fn topics(&self) -> Topics;

    /// Publishes `payload` (validated against `M` when a validator is
    /// installed) to `topic`. Never panics for a runtime condition — every
    /// failure mode funnels into `PublishErr`; the only panic is the missing
    /// `PubSubPlugin` programmer error, same as `topics()`.
    fn publish<M: MessageSchema>(
        &self,
        topic: &str,
        payload: Value,
        opts: Option<PublishOpts>,
    ) -> ws_kit_core::BoxFuture<'_, PublishResult>;
}

impl<S: Send + Sync + 'static> PubSubContextExt for Context<S> {
    fn topics(&self) -> Topics {
        let adapter: Arc<dyn PubSubAdapter> = require(self, "topics");
        let limits: Arc<TopicLimits> = require(self, "topics");
        let hooks: TopicHooks = require(self, "topics");
        let registry: Arc<TopicRegistry> = require(self, "topics");
        Topics::new(self.client_id, adapter, registry, limits, hooks)
    }

    fn publish<M: MessageSchema>(
        &self,
        topic: &str,
        payload: Value,
        opts: Option<PublishOpts>,
    ) -> ws_kit_core::BoxFuture<'_, PublishResult> {
        let topic = topic.to_string();
        let opts = opts.unwrap_or_default();
        Box::pin(async move {
            let adapter: Arc<dyn PubSubAdapter> = require(self, "publish");
            let limits: Arc<TopicLimits> = require(self, "publish");
            let hooks: TopicHooks = require(self, "publish");

            // Closed error set per the discriminated result: topic-contract
            // failures here are reported as VALIDATION, not INVALID_TOPIC —
            // the latter is reserved for subscribe/unsubscribe's error-sink
            // path, which has no such restricted vocabulary.
            if let Err(reason) = limits.validate(&topic) {
                return Err(publish_err(
                    ErrorCode::ValidationError,
                    Some(serde_json::json!({ "reason": reason.as_str() })),
                ));
            }

            if let Some(f) = &hooks.authorize_publish {
                if !f(self.client_id, &topic) {
                    return Err(publish_err(ErrorCode::AclPublish, None));
                }
            }

            if let Some(validator) = self.extensions().get::<Arc<dyn Validator>>() {
                match validator.safe_parse(SchemaId::of::<M>(), &payload) {
                    ParseOutcome::Invalid(issues) => return Err(publish_err(ErrorCode::ValidationError, Some(issues))),
                    ParseOutcome::Valid(_) => {}
                }
            }

            let frame = OutboundFrame {
                msg_type: M::TYPE.to_string(),
                meta: OutboundMeta {
                    correlation_id: opts.correlation_id,
                    timestamp: now_ms(),
                },
                payload: Some(payload),
            };

            match adapter.publish(&topic, frame).await {
                Ok(ack) => Ok(PublishOk {
                    capability: ack.capability,
                    matched: ack.matched,
                }),
                Err(err) => Err(publish_err(err.code, err.details)),
            }
        })
    }
}
