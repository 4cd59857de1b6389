//! The nine-step dispatch pipeline: decode, classify, short-circuit system
//! messages, look up a route, admit under the in-flight cap, build context,
//! compose middleware, execute, finalize.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug_span;

use crate::connection::ConnectionState;
use crate::context::Context;
use crate::envelope::{is_reserved_type, Envelope, OutboundFrame, OutboundMeta, CLOSE_TYPE, HEARTBEAT_ACK_TYPE, HEARTBEAT_TYPE};
use crate::error::{ErrorCode, RouterError};
use crate::lifecycle::LifecycleManager;
use crate::limits::LimitsManager;
use crate::route::RouteTable;
use crate::BoxFuture;

pub type Handler<S> = Arc<dyn Fn(Context<S>) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync>;

/// `Clone` so a misbehaving middleware *can* call the same logical `next`
/// twice (e.g. by cloning it into a retry branch) — the point is to detect
/// that at runtime and route it to the error sink, not to make it a compile
/// error, which would diverge from the documented "double-next" failure
/// mode.
pub type Middleware<S> = Arc<dyn Fn(Context<S>, Next<S>) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync>;

struct ChainState<S> {
    middlewares: Arc<[Middleware<S>]>,
    handler: Handler<S>,
}

pub struct Next<S> {
    state: Arc<ChainState<S>>,
    idx: usize,
    called: Arc<AtomicBool>,
}

impl<S> Clone for Next<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            idx: self.idx,
            called: self.called.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> Next<S> {
    fn root(middlewares: Arc<[Middleware<S>]>, handler: Handler<S>) -> Self {
        Self {
            state: Arc::new(ChainState { middlewares, handler }),
            idx: 0,
            called: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run(self, ctx: Context<S>) -> Result<(), RouterError> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Err(RouterError::new(
                ErrorCode::MiddlewareDoubleNext,
                "next() called more than once for the same middleware invocation",
            ));
        }
        if self.idx < self.state.middlewares.len() {
            let mw = self.state.middlewares[self.idx].clone();
            let next = Next {
                state: self.state.clone(),
                idx: self.idx + 1,
                called: Arc::new(AtomicBool::new(false)),
            };
            mw(ctx, next).await
        } else {
            (self.state.handler)(ctx).await
        }
    }
}

/// Owns everything `dispatch_frame` needs: the route table, the global
/// middleware stack, admission limits, and the lifecycle sink. Constructed
/// once by `Router` and shared across every connection.
pub struct Dispatcher<S> {
    pub routes: RouteTable<S>,
    pub global_middlewares: Vec<Middleware<S>>,
    pub limits: LimitsManager,
    pub lifecycle: Arc<LifecycleManager<S>>,
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    pub fn new(routes: RouteTable<S>, limits: LimitsManager, lifecycle: Arc<LifecycleManager<S>>) -> Self {
        Self {
            routes,
            global_middlewares: Vec::new(),
            limits,
            lifecycle,
        }
    }

    /// Runs one frame through the full pipeline. Never returns an error to
    /// the caller — every failure is routed to the error sink per §7's
    /// propagation policy, so the transport adapter always gets back `()`.
    pub async fn dispatch_frame<F, Fut>(&self, conn: &Arc<ConnectionState<S>>, raw: &[u8], now_ms: i64, build_ctx: F)
    where
        F: FnOnce(String, crate::envelope::InboundMeta, Option<serde_json::Value>) -> Fut,
        Fut: std::future::Future<Output = Result<Context<S>, RouterError>>,
    {
        let _span = debug_span!("dispatch", client_id = %conn.client_id).entered();

        // 1. decode
        if !self.limits.payload_within_limit(raw.len()) {
            self.lifecycle.report(
                RouterError::new(ErrorCode::PayloadTooLarge, "payload exceeds configured limit"),
                None,
            );
            return;
        }
        let text = match std::str::from_utf8(raw) {
            Ok(t) => t,
            Err(e) => {
                self.lifecycle
                    .report(RouterError::new(ErrorCode::ParseError, e.to_string()), None);
                return;
            }
        };

        // 2. classify — first confirm the frame is JSON at all (PARSE_ERROR),
        // then confirm it has the envelope shape (INVALID_ENVELOPE). A frame
        // that fails the first check never reaches the second.
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                self.lifecycle
                    .report(RouterError::new(ErrorCode::ParseError, e.to_string()), None);
                return;
            }
        };
        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(e) => e,
            Err(e) => {
                self.lifecycle
                    .report(RouterError::new(ErrorCode::InvalidEnvelope, e.to_string()), None);
                return;
            }
        };
        let is_system = envelope.msg_type == HEARTBEAT_TYPE || envelope.msg_type == CLOSE_TYPE;
        if !is_system && is_reserved_type(&envelope.msg_type) {
            self.lifecycle.report(
                RouterError::new(ErrorCode::ReservedType, format!("`{}` is a reserved type", envelope.msg_type)),
                None,
            );
            return;
        }

        // 3. system short-circuit
        conn.touch(now_ms);
        if envelope.msg_type == HEARTBEAT_TYPE {
            let ack = OutboundFrame {
                msg_type: HEARTBEAT_ACK_TYPE.to_string(),
                meta: OutboundMeta {
                    correlation_id: None,
                    timestamp: now_ms,
                },
                payload: None,
            };
            if let Err(err) = conn.conn.send(ack).await {
                self.lifecycle.report(err, None);
            }
            return;
        }
        if envelope.msg_type == CLOSE_TYPE {
            conn.conn.close(None, None);
            return;
        }

        // 4. lookup
        let Some(route) = self.routes.get(&envelope.msg_type) else {
            self.lifecycle.report(
                RouterError::new(ErrorCode::NoHandler, format!("no handler registered for `{}`", envelope.msg_type)),
                None,
            );
            return;
        };

        // 5. admit
        if !self.limits.try_admit(conn) {
            self.lifecycle.report(
                RouterError::new(ErrorCode::Backpressure, "too many messages in flight for this connection"),
                None,
            );
            return;
        }

        // 6. build context (runs the enhancer chain; Router supplies this closure
        // so `Dispatcher` itself never needs to know about `EnhancerChain`)
        let ctx = match build_ctx(envelope.msg_type, envelope.meta, envelope.payload).await {
            Ok(ctx) => ctx,
            Err(err) => {
                conn.release();
                self.lifecycle.report(err, None);
                return;
            }
        };

        // 7. compose middleware chain (global first, then route-scoped)
        let mut chain: Vec<Middleware<S>> = self.global_middlewares.clone();
        chain.extend(route.middlewares.iter().cloned());
        let next = Next::root(Arc::from(chain.into_boxed_slice()), route.handler.clone());

        // 8. execute — clone before handing ctx to the chain by value so
        // finalize still has something to notify observers with once the
        // handler has actually run.
        let notify_ctx = ctx.clone();
        let result = next.run(ctx).await;

        // 9. finalize: release the in-flight slot, notify onMessage with the
        // completed run's context, then route any error to the sink.
        conn.release();
        self.lifecycle.notify_message(&notify_ctx);
        if let Err(err) = result {
            self.lifecycle.report(err, None);
        }
    }
}
