//! Plugin host and the runtime capability model.
//!
//! Grounded on `r2e-core::plugin::Plugin::install<T>(self, app: AppBuilder<T>) -> AppBuilder<T>`:
//! a plugin consumes and returns the router, free to register routes,
//! middleware, and enhancers before handing it back.

use std::any::TypeId;
use std::collections::HashSet;

use crate::router::Router;

/// A small bitset of capabilities a plugin grants the router. Checked at
/// call time by gated extension-trait methods (`router.rpc(..)`,
/// `router.publish(..)`) rather than encoded in the router's type — spec
/// explicitly allows this: capability gating is a call-time safety net, not
/// a compile-time requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const VALIDATION: CapabilitySet = CapabilitySet(1 << 0);
    pub const PUBSUB: CapabilitySet = CapabilitySet(1 << 1);

    pub const fn empty() -> Self {
        CapabilitySet(0)
    }

    pub const fn contains(self, other: CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: CapabilitySet) -> Self {
        CapabilitySet(self.0 | other.0)
    }
}

impl std::ops::BitOr for CapabilitySet {
    type Output = CapabilitySet;
    fn bitor(self, rhs: CapabilitySet) -> CapabilitySet {
        self.union(rhs)
    }
}

/// Installed once via `Router::plugin`. Consumes and returns the router so a
/// plugin can register routes, middleware, and enhancers in one pass.
pub trait Plugin<S>: 'static {
    fn install(self, router: Router<S>) -> Router<S>;

    /// Capabilities this plugin grants once installed. Defaults to none —
    /// most plugins (e.g. a logging or metrics plugin) gate nothing.
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }

    /// A plugin-unique name for diagnostics; defaults to the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Tracks which plugin types have already been installed, so a plugin that
/// is accidentally installed twice is a no-op the second time rather than
/// double-registering its routes. Mirrors the teacher's plugin-ordering
/// bookkeeping in `AppBuilder`.
#[derive(Default)]
pub struct InstalledPlugins(HashSet<TypeId>);

impl InstalledPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the first time `P` has been marked
    /// installed.
    pub fn mark<P: 'static>(&mut self) -> bool {
        self.0.insert(TypeId::of::<P>())
    }

    pub fn contains<P: 'static>(&self) -> bool {
        self.0.contains(&TypeId::of::<P>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_union_and_contains() {
        let caps = CapabilitySet::VALIDATION | CapabilitySet::PUBSUB;
        assert!(caps.contains(CapabilitySet::VALIDATION));
        assert!(caps.contains(CapabilitySet::PUBSUB));
        assert!(!CapabilitySet::VALIDATION.contains(CapabilitySet::PUBSUB));
    }

    #[test]
    fn installed_plugins_marks_once() {
        struct A;
        struct B;
        let mut installed = InstalledPlugins::new();
        assert!(installed.mark::<A>());
        assert!(!installed.mark::<A>());
        assert!(installed.mark::<B>());
    }
}
