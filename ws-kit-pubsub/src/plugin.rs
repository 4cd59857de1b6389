//! Installs the pub/sub adapter, topic registry, and topic contract onto
//! every context, and grants the `pubsub` capability.

use std::sync::Arc;

use ws_kit_core::adapter::PubSubAdapter;
use ws_kit_core::connection::ClientId;
use ws_kit_core::context::Context;
use ws_kit_core::error::RouterError;
use ws_kit_core::lifecycle::Observer;
use ws_kit_core::plugin::{CapabilitySet, Plugin};
use ws_kit_core::router::Router;

use crate::config::TopicLimits;
use crate::registry::TopicRegistry;
use crate::topics::TopicHooks;

pub struct PubSubPlugin {
    adapter: Arc<dyn PubSubAdapter>,
    limits: TopicLimits,
    hooks: TopicHooks,
}

impl PubSubPlugin {
    pub fn new(adapter: Arc<dyn PubSubAdapter>) -> Self {
        Self {
            adapter,
            limits: TopicLimits::default(),
            hooks: TopicHooks::default(),
        }
    }

    pub fn with_limits(mut self, limits: TopicLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_hooks(mut self, hooks: TopicHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl<S: Send + Sync + 'static> Plugin<S> for PubSubPlugin {
    fn install(self, router: Router<S>) -> Router<S> {
        let adapter = self.adapter;
        let limits = Arc::new(self.limits);
        let hooks = self.hooks;
        let registry = Arc::new(TopicRegistry::new());

        let enhancer_registry = registry.clone();
        let observer_registry = registry.clone();

        router
            .enhance(0, move |ctx: &mut Context<S>| {
                let adapter = adapter.clone();
                let limits = limits.clone();
                let hooks = hooks.clone();
                let registry = enhancer_registry.clone();
                Box::pin(async move {
                    ctx.extensions_mut().insert(adapter);
                    ctx.extensions_mut().insert(limits);
                    ctx.extensions_mut().insert(hooks);
                    ctx.extensions_mut().insert(registry);
                    Ok::<(), RouterError>(())
                })
            })
            .observe(Arc::new(DropSubscriptionsOnClose { registry: observer_registry }))
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::PUBSUB
    }
}

struct DropSubscriptionsOnClose {
    registry: Arc<TopicRegistry>,
}

impl<S> Observer<S> for DropSubscriptionsOnClose {
    fn on_close(&self, client_id: ClientId) {
        self.registry.drop_connection(client_id);
    }
}
