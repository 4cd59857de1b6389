//! Background idle-connection watcher.
//!
//! `__heartbeat` frames reset a connection's activity clock in
//! `dispatch::classify`; this loop is the other half — it periodically scans
//! for connections that have gone quiet past `timeout_ms` and closes them.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::connection::{ClientId, ConnectionRegistry};
use crate::lifecycle::LifecycleManager;
use crate::rpc::{now_ms, RpcManager};

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub timeout_ms: i64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 45_000,
        }
    }
}

/// Runs until cancelled. Intended to be spawned once per router via
/// `tokio::spawn` from `Router::new` when heartbeat is configured.
pub async fn run<S: Send + Sync + 'static>(
    registry: Arc<ConnectionRegistry<S>>,
    cfg: HeartbeatConfig,
    lifecycle: Arc<LifecycleManager<S>>,
    rpc: Arc<RpcManager>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.interval_ms));
    loop {
        ticker.tick().await;
        let now = now_ms();
        let mut expired: Vec<ClientId> = Vec::new();
        registry.for_each(|conn| {
            if now - conn.last_activity_ms() >= cfg.timeout_ms {
                expired.push(conn.client_id);
            }
        });
        for client_id in expired {
            if let Some(conn) = registry.remove(client_id) {
                info!(%client_id, "closing idle connection");
                conn.conn.close(Some(1001), Some("idle timeout".into()));
                lifecycle.notify_close(client_id);
                rpc.drop_connection(client_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::NoopTransport;
    use crate::connection::ConnectionState;

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_closed_after_timeout() {
        let registry: Arc<ConnectionRegistry<()>> = Arc::new(ConnectionRegistry::new());
        let id = ClientId::new();
        registry.insert(Arc::new(ConnectionState::new(id, Arc::new(NoopTransport), (), now_ms())));

        let lifecycle = Arc::new(LifecycleManager::new());
        let rpc = Arc::new(RpcManager::default());
        let cfg = HeartbeatConfig {
            interval_ms: 10,
            timeout_ms: 0,
        };
        let handle = tokio::spawn(run(registry.clone(), cfg, lifecycle, rpc));
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        handle.abort();
        assert!(registry.get(id).is_none());
    }
}
