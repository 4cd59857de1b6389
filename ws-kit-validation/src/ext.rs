//! `router.rpc(...)` registration and the outbound context methods
//! (`send`/`reply`/`progress`/`fail`) that require the `validation`
//! capability.
//!
//! Defined as extension traits over `ws_kit_core::Router<S>`/`Context<S>` —
//! legal under Rust's orphan rules because the *trait* is local to this
//! crate even though the *type* it's implemented for is not.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use ws_kit_core::adapter::{ParseOutcome, Validator};
use ws_kit_core::context::Context;
use ws_kit_core::envelope::{OutboundFrame, OutboundMeta};
use ws_kit_core::error::{ErrorCode, RouterError};
use ws_kit_core::plugin::CapabilitySet;
use ws_kit_core::router::Router;
use ws_kit_core::rpc::{now_ms, ActiveRpc, RpcManager};
use ws_kit_core::schema::{MessageSchema, RpcSchema, SchemaId};
use ws_kit_core::BoxFuture;

pub const RPC_PROGRESS_TYPE: &str = "$ws:rpc-progress";
pub const RPC_ERROR_TYPE: &str = "$ws:rpc-error";

/// Optional knobs shared by `send`/`reply`/`progress`/`fail`, mirroring the
/// wire-level `opts?` parameter. `None` at a call site is equivalent to
/// `RpcOpts::default()`.
#[derive(Clone, Default)]
pub struct RpcOpts {
    /// `send()`-only: copies the inbound `correlationId` onto the outbound
    /// frame, which otherwise carries none.
    pub preserve_correlation: bool,
    /// `send()`-only: bounds how long to wait for the transport to accept
    /// the frame. `None` awaits indefinitely.
    pub wait_for: Option<Duration>,
    /// `progress()`-only: a call within this many milliseconds of the last
    /// emitted progress frame is coalesced away rather than sent.
    pub throttle_ms: Option<i64>,
    /// Checked by all four methods: if already tripped, the method returns
    /// without emitting anything.
    pub signal: Option<CancellationToken>,
}

impl RpcOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preserve_correlation(mut self, preserve: bool) -> Self {
        self.preserve_correlation = preserve;
        self
    }

    pub fn wait_for(mut self, timeout: Duration) -> Self {
        self.wait_for = Some(timeout);
        self
    }

    pub fn throttle_ms(mut self, ms: i64) -> Self {
        self.throttle_ms = Some(ms);
        self
    }

    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|s| s.is_cancelled())
    }
}

pub trait RpcRouterExt<S> {
    /// Registers a request/response handler for `M`. Requires the
    /// `validation` capability — panics otherwise, per the "gated method
    /// called without its capability raises a fatal configuration error"
    /// rule.
    fn rpc<M: RpcSchema>(
        self,
        handler: impl Fn(Context<S>) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync + 'static,
    ) -> Self;
}

impl<S: Send + Sync + 'static> RpcRouterExt<S> for Router<S> {
    fn rpc<M: RpcSchema>(
        self,
        handler: impl Fn(Context<S>) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync + 'static,
    ) -> Self {
        if !self.capabilities().contains(CapabilitySet::VALIDATION) {
            panic!(
                "router.rpc::<{}>() requires ValidationPlugin to be installed first (missing `validation` capability)",
                std::any::type_name::<M>()
            );
        }
        let rpc_manager = self.rpc_manager().clone();
        let handler = Arc::new(handler);
        self.on_with::<M>(
            Vec::new(),
            move |mut ctx: Context<S>| {
                let rpc_manager = rpc_manager.clone();
                let handler = handler.clone();
                Box::pin(async move {
                    let Some(correlation_id) = ctx.meta.correlation_id.clone() else {
                        return Err(RouterError::new(
                            ErrorCode::ValidationError,
                            "RPC calls require meta.correlationId",
                        ));
                    };

                    if let Some(validator) = ctx.extensions().get::<Arc<dyn Validator>>().cloned() {
                        let data = ctx.payload.clone().unwrap_or(Value::Null);
                        match validator.safe_parse(SchemaId::of::<M>(), &data) {
                            ParseOutcome::Invalid(issues) => {
                                return Err(RouterError::new(ErrorCode::ValidationError, "inbound payload failed validation")
                                    .with_details(issues));
                            }
                            ParseOutcome::Valid(parsed) => ctx.payload = Some(parsed),
                        }
                    }

                    let active = rpc_manager.begin(ctx.client_id, correlation_id).await?;
                    ctx.extensions_mut().insert(active);
                    ctx.extensions_mut().insert(ResponseSchema(SchemaId::of::<M::Response>()));
                    handler(ctx).await
                })
            },
        )
    }
}

/// Stashed by `rpc()` so `reply`/`progress` know which schema to validate
/// the outbound payload against, without needing `M` in scope anymore.
struct ResponseSchema(SchemaId);

fn active_rpc<S>(ctx: &Context<S>) -> Result<Arc<ActiveRpc>, RouterError> {
    ctx.extensions()
        .get::<Arc<ActiveRpc>>()
        .cloned()
        .ok_or_else(|| RouterError::new(ErrorCode::State, "not an in-flight rpc context"))
}

fn rpc_manager<S>(ctx: &Context<S>) -> Result<Arc<RpcManager>, RouterError> {
    ctx.extensions()
        .get::<Arc<RpcManager>>()
        .cloned()
        .ok_or_else(|| RouterError::new(ErrorCode::State, "validation plugin not installed"))
}

async fn validate_outbound<S>(
    ctx: &Context<S>,
    schema: Option<SchemaId>,
    payload: &Value,
    code: ErrorCode,
) -> Result<(), RouterError> {
    let (Some(schema), Some(validator)) = (schema, ctx.extensions().get::<Arc<dyn Validator>>()) else {
        return Ok(());
    };
    match validator.safe_parse(schema, payload) {
        ParseOutcome::Valid(_) => Ok(()),
        ParseOutcome::Invalid(issues) => Err(RouterError::new(code, "outbound payload failed validation").with_details(issues)),
    }
}

/// Outbound methods on `Context`, requiring the `validation` capability for
/// their (optional) outbound schema check.
pub trait RpcContextExt {
    /// Unicasts an event-shaped message to this connection, validating the
    /// outbound payload against `M` when a validator is installed.
    fn send<M: MessageSchema>(&self, payload: Value, opts: Option<RpcOpts>) -> BoxFuture<'_, Result<(), RouterError>>;
    /// RPC-only; one-shot. A second call for an already-terminal correlation
    /// id is a silent no-op, not an error.
    fn reply(&self, payload: Value, opts: Option<RpcOpts>) -> BoxFuture<'_, Result<(), RouterError>>;
    fn progress(&self, payload: Value, opts: Option<RpcOpts>) -> BoxFuture<'_, Result<(), RouterError>>;
    /// RPC-only; terminal; subject to the same one-shot guard as `reply`.
    fn fail(
        &self,
        code: ErrorCode,
        message: String,
        details: Option<Value>,
        opts: Option<RpcOpts>,
    ) -> BoxFuture<'_, Result<(), RouterError>>;
}

impl<S: Send + Sync + 'static> RpcContextExt for Context<S> {
    fn send<M: MessageSchema>(&self, payload: Value, opts: Option<RpcOpts>) -> BoxFuture<'_, Result<(), RouterError>> {
        Box::pin(async move {
            let opts = opts.unwrap_or_default();
            if opts.is_cancelled() {
                return Ok(());
            }
            validate_outbound(self, Some(SchemaId::of::<M>()), &payload, ErrorCode::OutboundValidationError).await?;
            let correlation_id = if opts.preserve_correlation {
                self.meta.correlation_id.clone()
            } else {
                None
            };
            let frame = OutboundFrame {
                msg_type: M::TYPE.to_string(),
                meta: OutboundMeta {
                    correlation_id,
                    timestamp: now_ms(),
                },
                payload: Some(payload),
            };
            match opts.wait_for {
                Some(timeout) => tokio::time::timeout(timeout, self.transport().send(frame))
                    .await
                    .unwrap_or_else(|_| Err(RouterError::new(ErrorCode::SendError, "send() timed out waiting for transport"))),
                None => self.transport().send(frame).await,
            }
        })
    }

    fn reply<'a>(&'a self, payload: Value, opts: Option<RpcOpts>) -> BoxFuture<'a, Result<(), RouterError>> {
        Box::pin(async move {
            let opts = opts.unwrap_or_default();
            if opts.is_cancelled() {
                return Ok(());
            }
            let rpc = rpc_manager(self)?;
            let correlation_id = self.meta.correlation_id.clone().ok_or_else(|| {
                RouterError::new(ErrorCode::State, "reply() called outside an rpc context")
            })?;
            // Mark terminal before validating the payload: a reply that fails
            // outbound validation is still the rpc's one and only terminal
            // frame attempt, so a later duplicate reply must still be rejected
            // as RPC_DUPLICATE_TERMINAL rather than re-attempted. A duplicate
            // terminal here means this is itself the second `reply()` call,
            // which is a one-shot no-op, not an error.
            if let Err(err) = rpc.complete(self.client_id, &correlation_id).await {
                return if err.code == ErrorCode::RpcDuplicateTerminal { Ok(()) } else { Err(err) };
            }
            let schema = self.extensions().get::<ResponseSchema>().map(|s| s.0);
            validate_outbound(self, schema, &payload, ErrorCode::ReplyValidationError).await?;
            let frame = OutboundFrame {
                msg_type: self.msg_type.clone(),
                meta: OutboundMeta {
                    correlation_id: Some(correlation_id),
                    timestamp: now_ms(),
                },
                payload: Some(payload),
            };
            self.transport().send(frame).await
        })
    }

    fn progress<'a>(&'a self, payload: Value, opts: Option<RpcOpts>) -> BoxFuture<'a, Result<(), RouterError>> {
        Box::pin(async move {
            let opts = opts.unwrap_or_default();
            let active = active_rpc(self)?;
            if opts.is_cancelled() || active.cancel_token.is_cancelled() {
                return Ok(());
            }
            let now = now_ms();
            if !active.allow_progress(now, opts.throttle_ms) {
                return Ok(());
            }
            let schema = self.extensions().get::<ResponseSchema>().map(|s| s.0);
            validate_outbound(self, schema, &payload, ErrorCode::ProgressValidationError).await?;
            let correlation_id = self.meta.correlation_id.clone().ok_or_else(|| {
                RouterError::new(ErrorCode::State, "progress() called outside an rpc context")
            })?;
            active.touch(now);
            let frame = OutboundFrame {
                msg_type: RPC_PROGRESS_TYPE.to_string(),
                meta: OutboundMeta {
                    correlation_id: Some(correlation_id),
                    timestamp: now,
                },
                payload: Some(payload),
            };
            self.transport().send(frame).await
        })
    }

    fn fail<'a>(
        &'a self,
        code: ErrorCode,
        message: String,
        details: Option<Value>,
        opts: Option<RpcOpts>,
    ) -> BoxFuture<'a, Result<(), RouterError>> {
        Box::pin(async move {
            let opts = opts.unwrap_or_default();
            if opts.is_cancelled() {
                return Ok(());
            }
            let rpc = rpc_manager(self)?;
            let correlation_id = self.meta.correlation_id.clone().ok_or_else(|| {
                RouterError::new(ErrorCode::State, "fail() called outside an rpc context")
            })?;
            if let Err(err) = rpc.complete(self.client_id, &correlation_id).await {
                return if err.code == ErrorCode::RpcDuplicateTerminal { Ok(()) } else { Err(err) };
            }
            let frame = OutboundFrame {
                msg_type: RPC_ERROR_TYPE.to_string(),
                meta: OutboundMeta {
                    correlation_id: Some(correlation_id),
                    timestamp: now_ms(),
                },
                payload: Some(json!({
                    "code": code.as_str(),
                    "message": message,
                    "details": details,
                })),
            };
            self.transport().send(frame).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use ws_kit_core::config::RouterConfig;
    use ws_kit_core::router::Router;
    use ws_kit_core::schema::SchemaKind;

    use crate::plugin::ValidationPlugin;

    struct AllowAllValidator;
    impl Validator for AllowAllValidator {
        fn safe_parse(&self, _schema: SchemaId, data: &Value) -> ParseOutcome {
            ParseOutcome::Valid(data.clone())
        }
    }

    struct RecordingTransport {
        sent: StdMutex<Vec<OutboundFrame>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self { sent: StdMutex::new(Vec::new()) })
        }

        fn frames(&self) -> Vec<OutboundFrame> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ws_kit_core::adapter::TransportHandle for RecordingTransport {
        fn send<'a>(&'a self, frame: OutboundFrame) -> BoxFuture<'a, Result<(), RouterError>> {
            self.sent.lock().unwrap().push(frame);
            Box::pin(async { Ok(()) })
        }

        fn close(&self, _code: Option<u16>, _reason: Option<String>) {}
    }

    struct GetUser;
    impl MessageSchema for GetUser {
        const TYPE: &'static str = "GET_USER";
        const KIND: SchemaKind = SchemaKind::Rpc;
    }
    impl RpcSchema for GetUser {
        type Response = UserLoaded;
    }

    struct UserLoaded;
    impl MessageSchema for UserLoaded {
        const TYPE: &'static str = "USER_LOADED";
        const KIND: SchemaKind = SchemaKind::Event;
    }

    fn build_router() -> (Arc<Router<()>>, Arc<RecordingTransport>) {
        let router = Router::<()>::new(RouterConfig::new().with_heartbeat(ws_kit_core::heartbeat::HeartbeatConfig {
            interval_ms: 0,
            timeout_ms: 0,
        }))
        .plugin(ValidationPlugin::new(Arc::new(AllowAllValidator)))
        .rpc::<GetUser>(|ctx| {
            Box::pin(async move { ctx.reply(serde_json::json!({"name": "ada"}), None).await })
        })
        .into_shared();
        let transport = RecordingTransport::new();
        (router, transport)
    }

    #[tokio::test]
    async fn reply_sends_response_schema_with_correlation_id() {
        let (router, transport) = build_router();
        let bridge = router.websocket();
        let client_id = bridge.open(transport.clone());
        bridge
            .message(client_id, br#"{"type":"GET_USER","meta":{"correlationId":"req-1"}}"#)
            .await;

        let frames = transport.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type, "USER_LOADED");
        assert_eq!(frames[0].meta.correlation_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn rpc_without_correlation_id_is_rejected_before_handler() {
        let (router, transport) = build_router();
        let bridge = router.websocket();
        let client_id = bridge.open(transport.clone());
        bridge.message(client_id, br#"{"type":"GET_USER"}"#).await;

        assert!(transport.frames().is_empty());
    }

    #[tokio::test]
    async fn fail_sends_rpc_error_frame_and_completes() {
        let router = Router::<()>::new(RouterConfig::new().with_heartbeat(ws_kit_core::heartbeat::HeartbeatConfig {
            interval_ms: 0,
            timeout_ms: 0,
        }))
        .plugin(ValidationPlugin::new(Arc::new(AllowAllValidator)))
        .rpc::<GetUser>(|ctx| {
            Box::pin(async move {
                ctx.fail(ErrorCode::Unsupported, "boom".to_string(), None, None).await
            })
        })
        .into_shared();
        let transport = RecordingTransport::new();
        let bridge = router.websocket();
        let client_id = bridge.open(transport.clone());
        bridge
            .message(client_id, br#"{"type":"GET_USER","meta":{"correlationId":"req-2"}}"#)
            .await;

        let frames = transport.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type, RPC_ERROR_TYPE);
        assert_eq!(
            frames[0].payload,
            Some(serde_json::json!({"code": "UNSUPPORTED", "message": "boom", "details": null}))
        );
    }

    #[test]
    #[should_panic(expected = "requires ValidationPlugin")]
    fn rpc_without_validation_plugin_panics() {
        let _ = Router::<()>::new(RouterConfig::new())
            .rpc::<GetUser>(|ctx| Box::pin(async move { ctx.reply(Value::Null, None).await }));
    }

    struct RejectWrongShapeValidator;
    impl Validator for RejectWrongShapeValidator {
        fn safe_parse(&self, _schema: SchemaId, data: &Value) -> ParseOutcome {
            if data.get("wrongShape").is_some() {
                ParseOutcome::Invalid(serde_json::json!({"issues": ["unexpected field wrongShape"]}))
            } else {
                ParseOutcome::Valid(data.clone())
            }
        }
    }

    #[tokio::test]
    async fn reply_failing_validation_still_marks_rpc_terminal() {
        let router = Router::<()>::new(RouterConfig::new().with_heartbeat(ws_kit_core::heartbeat::HeartbeatConfig {
            interval_ms: 0,
            timeout_ms: 0,
        }))
        .plugin(ValidationPlugin::new(Arc::new(RejectWrongShapeValidator)))
        .rpc::<GetUser>(|ctx| Box::pin(async move { ctx.reply(serde_json::json!({"wrongShape": true}), None).await }))
        .into_shared();
        let transport = RecordingTransport::new();
        let bridge = router.websocket();
        let client_id = bridge.open(transport.clone());
        bridge
            .message(client_id, br#"{"type":"GET_USER","meta":{"correlationId":"req-3"}}"#)
            .await;

        assert!(transport.frames().is_empty());
        let err = router
            .rpc_manager()
            .complete(client_id, "req-3")
            .await
            .unwrap_err();
        assert_eq!(err.code, ws_kit_core::error::ErrorCode::RpcDuplicateTerminal);
    }

    #[tokio::test]
    async fn second_reply_is_a_silent_idempotent_noop() {
        let router = Router::<()>::new(RouterConfig::new().with_heartbeat(ws_kit_core::heartbeat::HeartbeatConfig {
            interval_ms: 0,
            timeout_ms: 0,
        }))
        .plugin(ValidationPlugin::new(Arc::new(AllowAllValidator)))
        .rpc::<GetUser>(|ctx| {
            Box::pin(async move {
                ctx.reply(serde_json::json!({"name": "ada"}), None).await?;
                // Idempotent: must return Ok(()), not propagate RPC_DUPLICATE_TERMINAL.
                assert!(ctx.reply(serde_json::json!({"name": "ada"}), None).await.is_ok());
                Ok(())
            })
        })
        .into_shared();
        let transport = RecordingTransport::new();
        let bridge = router.websocket();
        let client_id = bridge.open(transport.clone());
        bridge
            .message(client_id, br#"{"type":"GET_USER","meta":{"correlationId":"req-4"}}"#)
            .await;

        assert_eq!(transport.frames().len(), 1);
    }
}

