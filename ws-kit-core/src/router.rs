//! Public router facade: registration, plugin installation, and the
//! WebSocket transport bridge.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::RouterConfig;
use crate::connection::{ClientId, ConnectionRegistry, ConnectionState};
use crate::context::{Context, EnhancerChain};
use crate::dispatch::{Dispatcher, Handler, Middleware, Next};
use crate::envelope::is_reserved_type;
use crate::error::{RouteConflict, RouterError};
use crate::lifecycle::{LifecycleManager, Observer};
use crate::plugin::{CapabilitySet, InstalledPlugins, Plugin};
use crate::adapter::TransportHandle;
use crate::route::{MergePolicy, RouteEntry, RouteTable};
use crate::rpc::{now_ms, RpcManager};
use crate::schema::{MessageSchema, SchemaRegistry};
use crate::BoxFuture;

/// The router itself. `S` is the application's per-connection data type.
///
/// Configuration methods (`on`, `use_mw`, `plugin`, `merge`, `on_error`,
/// `observe`) consume and return `Self`, mirroring the teacher's
/// `AppBuilder` fluent style; once configuration is done, wrap the result in
/// `Arc` via `into_shared` and hand it to a transport adapter.
pub struct Router<S> {
    schemas: Arc<SchemaRegistry>,
    dispatcher: Dispatcher<S>,
    enhancers: EnhancerChain<S>,
    connections: Arc<ConnectionRegistry<S>>,
    rpc: Arc<RpcManager>,
    lifecycle: Arc<LifecycleManager<S>>,
    capabilities: CapabilitySet,
    installed: InstalledPlugins,
    config: RouterConfig,
    data_factory: Arc<dyn Fn() -> S + Send + Sync>,
}

impl<S: Default + Send + Sync + 'static> Router<S> {
    pub fn new(config: RouterConfig) -> Self {
        Self::with_data_factory(config, S::default)
    }
}

impl<S: Send + Sync + 'static> Router<S> {
    pub fn with_data_factory(config: RouterConfig, factory: impl Fn() -> S + Send + Sync + 'static) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new());
        let mut enhancers = EnhancerChain::new();
        // Core-owned seam at the lowest priority: plugin enhancers (installed
        // afterward, at priority >= 0 by convention) always run after this.
        enhancers.push(-1000, |_ctx| Box::pin(async { Ok(()) }));
        let rpc = Arc::new(RpcManager::new(
            config.rpc.max_active_per_connection,
            config.rpc.idle_timeout_ms,
            config.rpc.dedup_window_size,
            config.rpc.dedup_window_ms,
        ));
        Self {
            schemas: Arc::new(SchemaRegistry::new()),
            dispatcher: Dispatcher::new(RouteTable::new(), config.limits, lifecycle.clone()),
            enhancers,
            connections: Arc::new(ConnectionRegistry::new()),
            rpc,
            lifecycle,
            capabilities: CapabilitySet::empty(),
            installed: InstalledPlugins::new(),
            config,
            data_factory: Arc::new(factory),
        }
    }

    /// Registers a handler for message type `M`, rejecting reserved type
    /// prefixes synchronously — a typo like `__mytype` is a configuration
    /// bug, not a runtime condition to route to the error sink.
    pub fn on<M: MessageSchema>(
        self,
        handler: impl Fn(Context<S>) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync + 'static,
    ) -> Self {
        self.on_with::<M>(Vec::new(), handler)
    }

    pub fn on_with<M: MessageSchema>(
        mut self,
        middlewares: Vec<Middleware<S>>,
        handler: impl Fn(Context<S>) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync + 'static,
    ) -> Self {
        if is_reserved_type(M::TYPE) {
            panic!("cannot register a handler for reserved type `{}`", M::TYPE);
        }
        let descriptor = self.schemas.get_descriptor::<M>();
        let entry: RouteEntry<S> = RouteEntry {
            descriptor,
            middlewares,
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))) as Handler<S>,
        };
        self.dispatcher.routes.register(M::TYPE.to_string(), entry);
        self
    }

    pub fn use_mw(
        mut self,
        mw: impl Fn(Context<S>, Next<S>) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync + 'static,
    ) -> Self {
        self.dispatcher.global_middlewares.push(Arc::new(mw));
        self
    }

    /// Raises priority `p` for a context enhancer. Enhancers run in
    /// `(priority, order)` order before any middleware sees the context.
    pub fn enhance(
        mut self,
        priority: i32,
        f: impl for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, Result<(), RouterError>> + Send + Sync + 'static,
    ) -> Self {
        self.enhancers.push(priority, f);
        self
    }

    /// Installs a plugin. Idempotent: installing the same plugin type twice
    /// is a no-op the second time.
    pub fn plugin<P: Plugin<S>>(mut self, plugin: P) -> Self {
        if !self.installed.mark::<P>() {
            return self;
        }
        self.capabilities = self.capabilities.union(plugin.capabilities());
        plugin.install(self)
    }

    pub fn merge(mut self, other: RouteTable<S>, policy: MergePolicy) -> Result<Self, RouteConflict> {
        self.dispatcher.routes.merge(other, policy)?;
        Ok(self)
    }

    pub fn mount(mut self, prefix: &str, other: RouteTable<S>, policy: MergePolicy) -> Result<Self, RouteConflict> {
        self.dispatcher.routes.mount(prefix, other, policy)?;
        Ok(self)
    }

    pub fn on_error(self, sink: impl Fn(&RouterError, Option<&Context<S>>) + Send + Sync + 'static) -> Self {
        self.lifecycle.set_error_sink(sink);
        self
    }

    pub fn observe(self, observer: Arc<dyn Observer<S>>) -> Self {
        self.lifecycle.add_observer(observer);
        self
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn rpc_manager(&self) -> &Arc<RpcManager> {
        &self.rpc
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager<S>> {
        &self.lifecycle
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry<S>> {
        &self.connections
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Finalizes configuration and spawns the router's background tasks
    /// (heartbeat watcher, RPC idle sweeper). Registration methods consume
    /// `self` by value, so once this is called there is no going back to
    /// the builder form — matches the teacher's `AppBuilder::build` /
    /// `serve` split.
    pub fn into_shared(self) -> Arc<Self> {
        let router = Arc::new(self);
        router.clone().spawn_background_tasks();
        router
    }

    fn spawn_background_tasks(self: Arc<Self>) {
        if self.config.heartbeat.interval_ms > 0 {
            tokio::spawn(crate::heartbeat::run(
                self.connections.clone(),
                self.config.heartbeat,
                self.lifecycle.clone(),
                self.rpc.clone(),
            ));
        }
        let rpc = self.rpc.clone();
        let cadence = self.config.rpc.cleanup_cadence_ms.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(cadence));
            loop {
                ticker.tick().await;
                let _ = rpc.sweep_idle(now_ms()).await;
            }
        });
    }

    /// Access to the WebSocket transport bridge. Transport adapters drive
    /// the router exclusively through this handle — it is the only
    /// authoritative entry point for `open`/`message`/`close` events.
    pub fn websocket(self: &Arc<Self>) -> WebSocketBridge<'_, S> {
        WebSocketBridge { router: self }
    }
}

pub struct WebSocketBridge<'a, S> {
    router: &'a Arc<Router<S>>,
}

impl<'a, S: Send + Sync + 'static> WebSocketBridge<'a, S> {
    /// Registers a newly-accepted connection and seeds its data record.
    pub fn open(&self, conn: Arc<dyn TransportHandle>) -> ClientId {
        let client_id = ClientId::new();
        let data = (self.router.data_factory)();
        let state = Arc::new(ConnectionState::new(client_id, conn, data, now_ms()));
        self.router.connections.insert(state);
        self.router.lifecycle.notify_open(client_id);
        client_id
    }

    /// Feeds one inbound frame through the dispatch pipeline. Per-connection
    /// serialization is enforced here via `ConnectionState::dispatch_lock`.
    pub async fn message(&self, client_id: ClientId, raw: &[u8]) {
        let Some(conn) = self.router.connections.get(client_id) else {
            return;
        };
        let _guard = conn.dispatch_lock.lock().await;
        let router = self.router.clone();
        let conn2 = conn.clone();
        self.router
            .dispatcher
            .dispatch_frame(&conn, raw, now_ms(), move |msg_type, meta, payload| {
                let router = router.clone();
                let conn = conn2.clone();
                async move { build_context(&router, &conn, msg_type, meta, payload).await }
            })
            .await;
    }

    pub fn close(&self, client_id: ClientId) {
        if let Some(conn) = self.router.connections.remove(client_id) {
            conn.conn.close(None, None);
            self.router.lifecycle.notify_close(client_id);
            self.router.rpc.drop_connection(client_id);
        }
    }
}

async fn build_context<S: Send + Sync + 'static>(
    router: &Arc<Router<S>>,
    conn: &Arc<ConnectionState<S>>,
    msg_type: String,
    meta: crate::envelope::InboundMeta,
    payload: Option<Value>,
) -> Result<Context<S>, RouterError> {
    let mut ctx = Context::new(
        conn.client_id,
        msg_type,
        meta,
        payload,
        now_ms(),
        conn.conn.clone(),
        conn.data.clone(),
        router.lifecycle.clone(),
    );
    router.enhancers.run(&mut ctx).await?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::NoopTransport;
    use crate::schema::SchemaKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping;
    impl MessageSchema for Ping {
        const TYPE: &'static str = "PING";
        const KIND: SchemaKind = SchemaKind::Event;
    }

    #[tokio::test]
    async fn end_to_end_dispatch_reaches_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let router = Router::<()>::new(RouterConfig::new().with_heartbeat(crate::heartbeat::HeartbeatConfig {
            interval_ms: 0,
            timeout_ms: 0,
        }))
        .on::<Ping>(move |_ctx| {
            let hits2 = hits2.clone();
            Box::pin(async move {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .into_shared();

        let bridge = router.websocket();
        let client_id = bridge.open(Arc::new(NoopTransport));
        bridge.message(client_id, br#"{"type":"PING"}"#).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "reserved type")]
    fn registering_reserved_type_panics() {
        struct ReservedMsg;
        impl MessageSchema for ReservedMsg {
            const TYPE: &'static str = "__bogus";
            const KIND: SchemaKind = SchemaKind::Event;
        }
        let _ = Router::<()>::new(RouterConfig::new()).on::<ReservedMsg>(|_ctx| Box::pin(async { Ok(()) }));
    }
}
