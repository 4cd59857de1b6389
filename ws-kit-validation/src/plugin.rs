//! Installs a [`ws_kit_core::adapter::Validator`] handle onto every context so
//! [`crate::ext::RpcContextExt`] methods can find it, and grants the
//! `validation` capability the gated `rpc` registration method requires.

use std::sync::Arc;

use ws_kit_core::adapter::Validator;
use ws_kit_core::context::Context;
use ws_kit_core::error::RouterError;
use ws_kit_core::plugin::{CapabilitySet, Plugin};
use ws_kit_core::router::Router;
use ws_kit_core::rpc::RpcManager;

pub struct ValidationPlugin {
    validator: Arc<dyn Validator>,
}

impl ValidationPlugin {
    pub fn new(validator: Arc<dyn Validator>) -> Self {
        Self { validator }
    }
}

impl<S: Send + Sync + 'static> Plugin<S> for ValidationPlugin {
    fn install(self, router: Router<S>) -> Router<S> {
        let validator = self.validator;
        let rpc_manager: Arc<RpcManager> = router.rpc_manager().clone();
        // Priority 0: after the core's error-attaching enhancer (-1000), before
        // anything a later-installed plugin registers.
        router.enhance(0, move |ctx: &mut Context<S>| {
            let validator = validator.clone();
            let rpc_manager = rpc_manager.clone();
            Box::pin(async move {
                ctx.extensions_mut().insert(validator);
                ctx.extensions_mut().insert(rpc_manager);
                Ok::<(), RouterError>(())
            })
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::VALIDATION
    }
}
