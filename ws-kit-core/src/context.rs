//! Per-dispatch context handed to enhancers, middleware, and handlers.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use serde_json::Value;

use crate::connection::ClientId;
use crate::envelope::InboundMeta;
use crate::error::RouterError;
use crate::lifecycle::LifecycleManager;
use crate::adapter::TransportHandle;

/// Type-indexed heterogeneous map for plugin-contributed state on a
/// `Context`. Grounded on `r2e-core::meta::MetaRegistry`'s
/// `HashMap<TypeId, Box<dyn Any + Send + Sync>>`; this is the mechanism that
/// lets `ws-kit-validation`/`ws-kit-pubsub` attach collaborators (a validator
/// handle, an RPC manager handle) without the core crate knowing either
/// plugin exists.
#[derive(Default)]
pub struct Extensions(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.0
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.0.get_mut(&TypeId::of::<T>()).and_then(|b| b.downcast_mut())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.0
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }
}

/// One dispatch's worth of state: which connection, which message, and
/// whatever the enhancer chain stashed in `extensions` before handlers run.
///
/// `S` is the application's per-connection data type, seeded by the
/// transport adapter at `open` time and shared (via `assign_data`) across
/// every dispatch on that connection.
pub struct Context<S> {
    pub client_id: ClientId,
    pub msg_type: String,
    pub meta: InboundMeta,
    pub payload: Option<Value>,
    pub received_at: i64,
    conn: Arc<dyn TransportHandle>,
    data: Arc<RwLock<S>>,
    extensions: Extensions,
    lifecycle: Arc<LifecycleManager<S>>,
}

/// Snapshots the connection-facing handles (shared via `Arc`, so writes a
/// handler makes through `assign_data`/`transport` are still visible through
/// a clone taken earlier) but never the extensions map — those are a
/// per-dispatch, per-plugin stash that has no business outliving the
/// dispatch that built it.
impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            client_id: self.client_id,
            msg_type: self.msg_type.clone(),
            meta: self.meta.clone(),
            payload: self.payload.clone(),
            received_at: self.received_at,
            conn: self.conn.clone(),
            data: self.data.clone(),
            extensions: Extensions::new(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> Context<S> {
    pub fn new(
        client_id: ClientId,
        msg_type: String,
        meta: InboundMeta,
        payload: Option<Value>,
        received_at: i64,
        conn: Arc<dyn TransportHandle>,
        data: Arc<RwLock<S>>,
        lifecycle: Arc<LifecycleManager<S>>,
    ) -> Self {
        Self {
            client_id,
            msg_type,
            meta,
            payload,
            received_at,
            conn,
            data,
            extensions: Extensions::new(),
            lifecycle,
        }
    }

    pub fn data(&self) -> RwLockReadGuard<'_, S> {
        self.data.read().expect("connection data lock poisoned")
    }

    /// Merge application state into the connection's data record. Takes a
    /// closure rather than a partial-JSON patch: `S` is a concrete Rust type,
    /// so there is no `Object.assign` equivalent to reach for.
    pub fn assign_data(&self, f: impl FnOnce(&mut S)) {
        let mut guard = self.data.write().expect("connection data lock poisoned");
        f(&mut guard);
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn transport(&self) -> &Arc<dyn TransportHandle> {
        &self.conn
    }

    /// Route an error to the lifecycle error sink from handler/middleware
    /// code, without needing any plugin capability.
    pub fn error(&self, err: RouterError) {
        self.lifecycle.report(err, Some(self));
    }

    pub(crate) fn lifecycle(&self) -> &Arc<LifecycleManager<S>> {
        &self.lifecycle
    }
}

/// One step of context construction, run in `(priority, order)` order before
/// any middleware or handler sees the context. Plugins use this to stash
/// collaborators in `extensions` (a validator handle, an rpc manager handle)
/// or to enrich `data`.
pub struct Enhancer<S> {
    f: Arc<dyn for<'a> Fn(&'a mut Context<S>) -> crate::BoxFuture<'a, Result<(), RouterError>> + Send + Sync>,
    pub priority: i32,
    order: u64,
}

impl<S> Clone for Enhancer<S> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            priority: self.priority,
            order: self.order,
        }
    }
}

impl<S: Send + Sync + 'static> Enhancer<S> {
    pub fn new(
        priority: i32,
        order: u64,
        f: impl for<'a> Fn(&'a mut Context<S>) -> crate::BoxFuture<'a, Result<(), RouterError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            f: Arc::new(f),
            priority,
            order,
        }
    }
}

/// Enhancers sorted by `(priority, order)`, stable with respect to
/// registration order for equal priorities. The core always installs an
/// error-attaching enhancer at `priority = -1000` ahead of anything a plugin
/// can register, so plugin enhancers never run before it.
#[derive(Default)]
pub struct EnhancerChain<S> {
    enhancers: Vec<Enhancer<S>>,
    next_order: u64,
}

impl<S: Send + Sync + 'static> EnhancerChain<S> {
    pub fn new() -> Self {
        Self {
            enhancers: Vec::new(),
            next_order: 0,
        }
    }

    pub fn push(&mut self, priority: i32, f: impl for<'a> Fn(&'a mut Context<S>) -> crate::BoxFuture<'a, Result<(), RouterError>> + Send + Sync + 'static) {
        let order = self.next_order;
        self.next_order += 1;
        self.enhancers.push(Enhancer::new(priority, order, f));
        self.enhancers.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.order.cmp(&b.order)));
    }

    pub async fn run(&self, ctx: &mut Context<S>) -> Result<(), RouterError> {
        for enhancer in &self.enhancers {
            (enhancer.f)(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_roundtrip_by_type() {
        struct Marker(u32);
        let mut ext = Extensions::new();
        assert!(ext.get::<Marker>().is_none());
        ext.insert(Marker(7));
        assert_eq!(ext.get::<Marker>().unwrap().0, 7);
        ext.get_mut::<Marker>().unwrap().0 = 9;
        assert_eq!(ext.remove::<Marker>().unwrap().0, 9);
        assert!(ext.get::<Marker>().is_none());
    }

    #[tokio::test]
    async fn enhancer_chain_runs_in_priority_then_registration_order() {
        use crate::adapter::tests::NoopTransport;
        use crate::connection::ClientId;
        use crate::lifecycle::LifecycleManager;
        use std::sync::Mutex as StdMutex;

        let seen = Arc::new(StdMutex::new(Vec::<&'static str>::new()));
        let mut chain: EnhancerChain<()> = EnhancerChain::new();
        let s1 = seen.clone();
        chain.push(10, move |_ctx| {
            let s1 = s1.clone();
            Box::pin(async move {
                s1.lock().unwrap().push("b");
                Ok(())
            })
        });
        let s2 = seen.clone();
        chain.push(-1000, move |_ctx| {
            let s2 = s2.clone();
            Box::pin(async move {
                s2.lock().unwrap().push("a");
                Ok(())
            })
        });
        let s3 = seen.clone();
        chain.push(10, move |_ctx| {
            let s3 = s3.clone();
            Box::pin(async move {
                s3.lock().unwrap().push("c");
                Ok(())
            })
        });

        let mut ctx = Context::new(
            ClientId::new(),
            "PING".into(),
            Default::default(),
            None,
            0,
            Arc::new(NoopTransport),
            Arc::new(RwLock::new(())),
            Arc::new(LifecycleManager::new()),
        );
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }
}
