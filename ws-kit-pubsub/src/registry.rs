//! Per-connection subscription bookkeeping.
//!
//! Grounded on `ws_kit_core::connection::ConnectionRegistry`'s
//! `DashMap<ClientId, Arc<_>>` shape: sharded per-key state so one
//! connection's subscribe/unsubscribe never blocks another's.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;

use dashmap::DashMap;
use ws_kit_core::connection::ClientId;

/// All topics currently subscribed, indexed by connection. A plain
/// `std::sync::Mutex` guards each connection's set — per-connection dispatch
/// is already serialized by `ConnectionState::dispatch_lock`, so contention is
/// never more than the rare case of `close` racing a concurrent `subscribe`.
#[derive(Default)]
pub struct TopicRegistry {
    subscriptions: DashMap<ClientId, StdMutex<HashSet<String>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client_id: ClientId, topic: &str) -> bool {
        let entry = self.subscriptions.entry(client_id).or_default();
        entry.lock().unwrap().insert(topic.to_string())
    }

    /// Returns `true` if the topic was actually subscribed. Callers treat
    /// `false` as a soft no-op, never an error.
    pub fn remove(&self, client_id: ClientId, topic: &str) -> bool {
        match self.subscriptions.get(&client_id) {
            Some(entry) => entry.lock().unwrap().remove(topic),
            None => false,
        }
    }

    pub fn has(&self, client_id: ClientId, topic: &str) -> bool {
        self.subscriptions
            .get(&client_id)
            .map(|entry| entry.lock().unwrap().contains(topic))
            .unwrap_or(false)
    }

    pub fn list(&self, client_id: ClientId) -> Vec<String> {
        self.subscriptions
            .get(&client_id)
            .map(|entry| entry.lock().unwrap().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Replaces the whole set at once, returning `(added, removed)` so the
    /// caller can drive adapter-level subscribe/unsubscribe calls for exactly
    /// the delta.
    pub fn replace(&self, client_id: ClientId, topics: &[String]) -> (Vec<String>, Vec<String>) {
        let entry = self.subscriptions.entry(client_id).or_default();
        let mut guard = entry.lock().unwrap();
        let desired: HashSet<String> = topics.iter().cloned().collect();
        let added: Vec<String> = desired.difference(&guard).cloned().collect();
        let removed: Vec<String> = guard.difference(&desired).cloned().collect();
        *guard = desired;
        (added, removed)
    }

    pub fn clear(&self, client_id: ClientId) -> Vec<String> {
        match self.subscriptions.get(&client_id) {
            Some(entry) => std::mem::take(&mut *entry.lock().unwrap()).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn drop_connection(&self, client_id: ClientId) {
        self.subscriptions.remove(&client_id);
    }
}
