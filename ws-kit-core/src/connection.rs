//! Connection identity and per-connection state.
//!
//! Ownership model grounded on `r2e-core::ws::WsRooms`/`WsBroadcaster`: a
//! `DashMap` keyed by connection id holds an `Arc` to each connection's
//! state, so lookups never block the whole registry on one connection's
//! work.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::adapter::TransportHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        ClientId(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Everything the router keeps about one live connection between `open` and
/// `close`. Lives behind an `Arc` so a dispatch in flight can hold a clone
/// without pinning the whole registry.
pub struct ConnectionState<S> {
    pub client_id: ClientId,
    pub conn: Arc<dyn TransportHandle>,
    pub data: Arc<RwLock<S>>,
    /// Held for the full width of one frame's dispatch (steps 1–9), so two
    /// frames from the same connection never run concurrently.
    pub dispatch_lock: AsyncMutex<()>,
    inflight: AtomicUsize,
    last_activity_ms: AtomicI64,
}

impl<S> ConnectionState<S> {
    pub fn new(client_id: ClientId, conn: Arc<dyn TransportHandle>, data: S, now_ms: i64) -> Self {
        Self {
            client_id,
            conn,
            data: Arc::new(RwLock::new(data)),
            dispatch_lock: AsyncMutex::new(()),
            inflight: AtomicUsize::new(0),
            last_activity_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn try_admit(&self, max_pending: usize) -> bool {
        loop {
            let cur = self.inflight.load(Ordering::Acquire);
            if cur >= max_pending {
                return false;
            }
            if self
                .inflight
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release(&self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn touch(&self, now_ms: i64) {
        self.last_activity_ms.store(now_ms, Ordering::Release);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Acquire)
    }
}

/// Registry of all live connections, indexed by `ClientId`.
pub struct ConnectionRegistry<S> {
    inner: DashMap<ClientId, Arc<ConnectionState<S>>>,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self { inner: DashMap::new() }
    }
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: Arc<ConnectionState<S>>) {
        self.inner.insert(state.client_id, state);
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<ConnectionState<S>>> {
        self.inner.get(&id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: ClientId) -> Option<Arc<ConnectionState<S>>> {
        self.inner.remove(&id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<ConnectionState<S>>)) {
        for entry in self.inner.iter() {
            f(entry.value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::NoopTransport;

    #[test]
    fn admission_respects_max_pending() {
        let state = ConnectionState::new(ClientId::new(), Arc::new(NoopTransport), 0i32, 0);
        assert!(state.try_admit(1));
        assert!(!state.try_admit(1));
        state.release();
        assert!(state.try_admit(1));
    }

    #[test]
    fn registry_insert_get_remove() {
        let reg: ConnectionRegistry<i32> = ConnectionRegistry::new();
        let id = ClientId::new();
        let state = Arc::new(ConnectionState::new(id, Arc::new(NoopTransport), 0, 0));
        reg.insert(state.clone());
        assert!(reg.get(id).is_some());
        assert_eq!(reg.len(), 1);
        reg.remove(id);
        assert!(reg.get(id).is_none());
    }
}
