//! End-to-end scenarios against an in-memory transport double, one per
//! concrete case this system names as a testable property.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{json, Value};

use ws_kit_core::adapter::{ParseOutcome, TransportHandle, Validator};
use ws_kit_core::config::RouterConfig;
use ws_kit_core::context::Context;
use ws_kit_core::envelope::OutboundFrame;
use ws_kit_core::error::{ErrorCode, RouterError};
use ws_kit_core::heartbeat::HeartbeatConfig;
use ws_kit_core::router::Router;
use ws_kit_core::schema::{MessageSchema, SchemaKind};
use ws_kit_core::schema::RpcSchema;
use ws_kit_core::BoxFuture;

use ws_kit_validation::{RpcContextExt, RpcRouterExt, ValidationPlugin};

fn no_heartbeat() -> RouterConfig {
    RouterConfig::new().with_heartbeat(HeartbeatConfig {
        interval_ms: 0,
        timeout_ms: 0,
    })
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

impl TransportHandle for RecordingTransport {
    fn send<'a>(&'a self, frame: OutboundFrame) -> BoxFuture<'a, Result<(), RouterError>> {
        self.sent.lock().unwrap().push(frame);
        Box::pin(async { Ok(()) })
    }

    fn close(&self, _code: Option<u16>, _reason: Option<String>) {}
}

struct RecordingErrorSink {
    errors: StdMutex<Vec<RouterError>>,
}

impl RecordingErrorSink {
    fn new() -> Arc<Self> {
        Arc::new(Self { errors: StdMutex::new(Vec::new()) })
    }

    fn codes(&self) -> Vec<ErrorCode> {
        self.errors.lock().unwrap().iter().map(|e| e.code).collect()
    }
}

// 1. Unknown type: no handler invoked, NO_HANDLER reported, connection stays open.
#[tokio::test]
async fn unknown_type_is_reported_and_connection_stays_open() {
    struct Known;
    impl MessageSchema for Known {
        const TYPE: &'static str = "KNOWN";
        const KIND: SchemaKind = SchemaKind::Event;
    }

    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = hits.clone();
    let sink = RecordingErrorSink::new();
    let sink2 = sink.clone();

    let router = Router::<()>::new(no_heartbeat())
        .on::<Known>(move |_ctx| {
            let hits2 = hits2.clone();
            Box::pin(async move {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .on_error(move |err, _ctx| sink2.errors.lock().unwrap().push(err.clone()))
        .into_shared();

    let bridge = router.websocket();
    let client_id = bridge.open(RecordingTransport::new());
    bridge.message(client_id, br#"{"type":"UNKNOWN"}"#).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(sink.codes(), vec![ErrorCode::NoHandler]);
    assert!(router.connections().get(client_id).is_some());
}

// 2. Middleware order: global A, B then handler H. Observable log is exactly
// A:before, B:before, H, B:after, A:after.
#[tokio::test]
async fn middleware_runs_in_registration_order_around_the_handler() {
    struct T;
    impl MessageSchema for T {
        const TYPE: &'static str = "T";
        const KIND: SchemaKind = SchemaKind::Event;
    }

    let log = Arc::new(StdMutex::new(Vec::<&'static str>::new()));

    let log_a = log.clone();
    let log_b = log.clone();
    let log_h = log.clone();

    let router = Router::<()>::new(no_heartbeat())
        .use_mw(move |ctx: Context<()>, next| {
            let log_a = log_a.clone();
            Box::pin(async move {
                log_a.lock().unwrap().push("A:before");
                let result = next.run(ctx).await;
                log_a.lock().unwrap().push("A:after");
                result
            })
        })
        .use_mw(move |ctx: Context<()>, next| {
            let log_b = log_b.clone();
            Box::pin(async move {
                log_b.lock().unwrap().push("B:before");
                let result = next.run(ctx).await;
                log_b.lock().unwrap().push("B:after");
                result
            })
        })
        .on::<T>(move |_ctx| {
            let log_h = log_h.clone();
            Box::pin(async move {
                log_h.lock().unwrap().push("H");
                Ok(())
            })
        })
        .into_shared();

    let bridge = router.websocket();
    let client_id = bridge.open(RecordingTransport::new());
    bridge.message(client_id, br#"{"type":"T"}"#).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["A:before", "B:before", "H", "B:after", "A:after"]
    );
}

// 3. Heartbeat: exactly one outbound __heartbeat_ack; no user handler
// invoked even though registering one for "__heartbeat" is itself rejected.
#[tokio::test]
async fn heartbeat_round_trips_without_reaching_a_user_handler() {
    let router = Router::<()>::new(no_heartbeat()).into_shared();
    let bridge = router.websocket();
    let transport = RecordingTransport::new();
    let client_id = bridge.open(transport.clone());

    bridge.message(client_id, br#"{"type":"__heartbeat"}"#).await;

    let frames = transport.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].msg_type, "__heartbeat_ack");
    assert!(frames[0].meta.timestamp >= 0);
}

#[test]
#[should_panic(expected = "reserved type")]
fn registering_heartbeat_type_is_rejected_at_configuration_time() {
    struct FakeHeartbeat;
    impl MessageSchema for FakeHeartbeat {
        const TYPE: &'static str = "__heartbeat";
        const KIND: SchemaKind = SchemaKind::Event;
    }
    let _ = Router::<()>::new(no_heartbeat()).on::<FakeHeartbeat>(|_ctx| Box::pin(async { Ok(()) }));
}

struct AllowAllValidator;
impl Validator for AllowAllValidator {
    fn safe_parse(&self, _schema: ws_kit_core::schema::SchemaId, data: &Value) -> ParseOutcome {
        ParseOutcome::Valid(data.clone())
    }
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

// 4. RPC one-shot: handler calls reply() twice; exactly one outbound frame,
// second reply is a no-op.
#[tokio::test]
async fn rpc_double_reply_sends_exactly_one_frame() {
    let router = Router::<()>::new(no_heartbeat())
        .plugin(ValidationPlugin::new(Arc::new(AllowAllValidator)))
        .rpc::<GetUser>(|ctx| {
            Box::pin(async move {
                ctx.reply(json!({"name": "a"}), None).await?;
                // Second reply is a silent idempotent no-op: it must return
                // Ok(()), never propagate RPC_DUPLICATE_TERMINAL to the handler.
                assert!(ctx.reply(json!({"name": "a"}), None).await.is_ok());
                Ok(())
            })
        })
        .into_shared();

    let bridge = router.websocket();
    let transport = RecordingTransport::new();
    let client_id = bridge.open(transport.clone());
    bridge
        .message(client_id, br#"{"type":"GET_USER","meta":{"correlationId":"c1"},"payload":{"id":"u"}}"#)
        .await;

    let frames = transport.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].msg_type, "USER_LOADED");
    assert_eq!(frames[0].meta.correlation_id.as_deref(), Some("c1"));
    assert_eq!(frames[0].payload, Some(json!({"name": "a"})));
}

// 5. RPC cancel on disconnect: three RPCs on one connection, close it, all
// three cancellation tokens trip; the correlation ids are free again.
#[tokio::test]
async fn closing_a_connection_cancels_every_active_rpc() {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let cancelled_handler = cancelled.clone();

    let router = Router::<()>::new(no_heartbeat())
        .plugin(ValidationPlugin::new(Arc::new(AllowAllValidator)))
        .rpc::<GetUser>(move |ctx| {
            let cancelled_handler = cancelled_handler.clone();
            Box::pin(async move {
                // Register the callback and never reply — the rpc stays
                // active until the connection closes.
                if let Some(active) = ctx.extensions().get::<Arc<ws_kit_core::rpc::ActiveRpc>>().cloned() {
                    let cancelled_handler = cancelled_handler.clone();
                    active
                        .register_on_cancel(move || {
                            cancelled_handler.fetch_add(1, Ordering::SeqCst);
                        })
                        .await;
                }
                Ok(())
            })
        })
        .into_shared();

    let bridge = router.websocket();
    let transport = RecordingTransport::new();
    let client_id = bridge.open(transport.clone());

    for cid in ["c1", "c2", "c3"] {
        bridge
            .message(
                client_id,
                format!(r#"{{"type":"GET_USER","meta":{{"correlationId":"{cid}"}},"payload":{{"id":"u"}}}}"#).as_bytes(),
            )
            .await;
    }

    bridge.close(client_id);

    assert_eq!(cancelled.load(Ordering::SeqCst), 3);
    // State was cleared: the same correlation id is immediately admissible
    // again (on a fresh connection, since client_id itself no longer exists).
    let new_client = bridge.open(RecordingTransport::new());
    assert!(router.rpc_manager().begin(new_client, "c1".to_string()).await.is_ok());
}

// 6. Validation error: outbound validation enabled, handler replies with the
// wrong shape. No USER frame; error sink gets REPLY_VALIDATION_ERROR; the rpc
// is still terminal for dedup purposes.
struct RejectWrongShapeValidator;
impl Validator for RejectWrongShapeValidator {
    fn safe_parse(&self, _schema: ws_kit_core::schema::SchemaId, data: &Value) -> ParseOutcome {
        if data.get("wrongShape").is_some() {
            ParseOutcome::Invalid(json!({"issues": ["unexpected field wrongShape"]}))
        } else {
            ParseOutcome::Valid(data.clone())
        }
    }
}

#[tokio::test]
async fn reply_with_wrong_shape_is_reported_and_still_terminal() {
    let sink = RecordingErrorSink::new();
    let sink2 = sink.clone();

    let router = Router::<()>::new(no_heartbeat())
        .plugin(ValidationPlugin::new(Arc::new(RejectWrongShapeValidator)))
        .rpc::<GetUser>(|ctx| Box::pin(async move { ctx.reply(json!({"wrongShape": true}), None).await }))
        .on_error(move |err, _ctx| sink2.errors.lock().unwrap().push(err.clone()))
        .into_shared();

    let bridge = router.websocket();
    let transport = RecordingTransport::new();
    let client_id = bridge.open(transport.clone());
    bridge
        .message(client_id, br#"{"type":"GET_USER","meta":{"correlationId":"c1"},"payload":{"id":"u"}}"#)
        .await;

    assert!(transport.frames().is_empty());
    assert_eq!(sink.codes(), vec![ErrorCode::ReplyValidationError]);

    let err = router.rpc_manager().complete(client_id, "c1").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::RpcDuplicateTerminal);
}
