//! Correlation-id tracking for request/response RPC: admission, dedup of
//! terminal frames, cancellation propagation, and idle eviction.
//!
//! Sharded per-connection state behind a `DashMap`, grounded on
//! `r2e-core::ws::WsRooms`; cancellation uses `tokio_util::sync::CancellationToken`,
//! already a teacher dependency (`r2e-core::plugin::DeferredContext`'s
//! shutdown signal).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::connection::ClientId;
use crate::error::{ErrorCode, RouterError};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct ActiveRpc {
    pub correlation_id: String,
    pub client_id: ClientId,
    pub started_at_ms: i64,
    last_activity_ms: AtomicI64,
    /// Sentinel `i64::MIN` means "no progress frame emitted yet".
    last_progress_ms: AtomicI64,
    pub cancel_token: CancellationToken,
    terminal_sent: AtomicBool,
    on_cancel: AsyncMutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ActiveRpc {
    fn new(correlation_id: String, client_id: ClientId, started_at_ms: i64) -> Self {
        Self {
            correlation_id,
            client_id,
            started_at_ms,
            last_activity_ms: AtomicI64::new(started_at_ms),
            last_progress_ms: AtomicI64::new(i64::MIN),
            cancel_token: CancellationToken::new(),
            terminal_sent: AtomicBool::new(false),
            on_cancel: AsyncMutex::new(Vec::new()),
        }
    }

    pub async fn register_on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        self.on_cancel.lock().await.push(Box::new(f));
    }

    /// Records activity (a progress frame or a terminal frame) so the idle
    /// sweeper measures time since the RPC was last touched, not since it
    /// started.
    pub fn touch(&self, now: i64) {
        self.last_activity_ms.store(now, Ordering::SeqCst);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::SeqCst)
    }

    /// Coalesces progress emission: with no throttle window, always allows.
    /// With a window, a call within `throttle_ms` of the last allowed call
    /// is suppressed rather than emitted.
    pub fn allow_progress(&self, now: i64, throttle_ms: Option<i64>) -> bool {
        let Some(window) = throttle_ms else {
            self.last_progress_ms.store(now, Ordering::SeqCst);
            return true;
        };
        let prev = self.last_progress_ms.load(Ordering::SeqCst);
        if prev != i64::MIN && now - prev < window {
            return false;
        }
        self.last_progress_ms.store(now, Ordering::SeqCst);
        true
    }
}

struct RpcConnState {
    active: HashMap<String, Arc<ActiveRpc>>,
    /// Bounded ring of recently-completed correlation ids, so a duplicate
    /// terminal frame arriving just after completion is still caught as a
    /// dedup hit rather than silently treated as "unknown rpc".
    recently_terminated: VecDeque<(String, i64)>,
}

impl RpcConnState {
    fn new() -> Self {
        Self {
            active: HashMap::new(),
            recently_terminated: VecDeque::new(),
        }
    }
}

pub struct RpcManager {
    conns: DashMap<ClientId, Arc<AsyncMutex<RpcConnState>>>,
    pub max_active_per_connection: usize,
    pub idle_timeout_ms: i64,
    pub dedup_window_size: usize,
    pub dedup_window_ms: i64,
}

impl Default for RpcManager {
    fn default() -> Self {
        Self::new(32, 30_000, 256, 60_000)
    }
}

impl RpcManager {
    pub fn new(max_active_per_connection: usize, idle_timeout_ms: i64, dedup_window_size: usize, dedup_window_ms: i64) -> Self {
        Self {
            conns: DashMap::new(),
            max_active_per_connection,
            idle_timeout_ms,
            dedup_window_size,
            dedup_window_ms,
        }
    }

    /// Drops entries past the count bound or the TTL bound, whichever is hit
    /// first — the two eviction criteria are independent, not layered.
    fn prune_recently_terminated(&self, state: &mut RpcConnState, now: i64) {
        while state.recently_terminated.len() > self.dedup_window_size {
            state.recently_terminated.pop_front();
        }
        while state
            .recently_terminated
            .front()
            .is_some_and(|(_, terminated_at)| now - terminated_at >= self.dedup_window_ms)
        {
            state.recently_terminated.pop_front();
        }
    }

    fn entry(&self, client_id: ClientId) -> Arc<AsyncMutex<RpcConnState>> {
        self.conns
            .entry(client_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(RpcConnState::new())))
            .clone()
    }

    pub async fn begin(&self, client_id: ClientId, correlation_id: String) -> Result<Arc<ActiveRpc>, RouterError> {
        let entry = self.entry(client_id);
        let mut state = entry.lock().await;
        if state.active.len() >= self.max_active_per_connection {
            return Err(RouterError::new(
                ErrorCode::RpcInflightLimit,
                "too many in-flight RPC calls for this connection",
            ));
        }
        if state.active.contains_key(&correlation_id) {
            return Err(RouterError::new(
                ErrorCode::State,
                format!("correlation id `{correlation_id}` already in flight"),
            ));
        }
        let rpc = Arc::new(ActiveRpc::new(correlation_id.clone(), client_id, now_ms()));
        state.active.insert(correlation_id, rpc.clone());
        Ok(rpc)
    }

    /// Marks a correlation id's terminal frame (reply or error) as sent.
    /// A second call for the same id — the client's handler replying twice,
    /// or a progress frame racing a cancellation — is the duplicate-terminal
    /// failure mode.
    pub async fn complete(&self, client_id: ClientId, correlation_id: &str) -> Result<(), RouterError> {
        let now = now_ms();
        let entry = self.entry(client_id);
        let mut state = entry.lock().await;
        self.prune_recently_terminated(&mut state, now);
        let Some(rpc) = state.active.remove(correlation_id) else {
            let already_done = state.recently_terminated.iter().any(|(id, _)| id == correlation_id);
            return Err(RouterError::new(
                if already_done {
                    ErrorCode::RpcDuplicateTerminal
                } else {
                    ErrorCode::State
                },
                format!("no in-flight rpc for correlation id `{correlation_id}`"),
            ));
        };
        rpc.touch(now);
        if rpc.terminal_sent.swap(true, Ordering::SeqCst) {
            return Err(RouterError::new(
                ErrorCode::RpcDuplicateTerminal,
                format!("correlation id `{correlation_id}` already completed"),
            ));
        }
        state.recently_terminated.push_back((correlation_id.to_string(), now));
        self.prune_recently_terminated(&mut state, now);
        Ok(())
    }

    /// `true` until the dedup window (count or TTL, whichever comes first)
    /// evicts `correlation_id` from the recently-terminated ring. Does not
    /// consider still-active RPCs terminal.
    pub async fn is_terminal(&self, client_id: ClientId, correlation_id: &str) -> bool {
        let entry = self.entry(client_id);
        let mut state = entry.lock().await;
        self.prune_recently_terminated(&mut state, now_ms());
        state.recently_terminated.iter().any(|(id, _)| id == correlation_id)
    }

    /// Returns the live token for an in-flight RPC, or a pre-tripped token if
    /// `correlation_id` is terminal or was never admitted — callers racing
    /// cancellation always observe a consistent signal either way.
    pub async fn get_cancellation_token(&self, client_id: ClientId, correlation_id: &str) -> CancellationToken {
        let entry = self.entry(client_id);
        let state = entry.lock().await;
        if let Some(rpc) = state.active.get(correlation_id) {
            return rpc.cancel_token.clone();
        }
        let token = CancellationToken::new();
        token.cancel();
        token
    }

    pub async fn cancel(&self, client_id: ClientId, correlation_id: &str) -> Result<(), RouterError> {
        let entry = self.entry(client_id);
        let rpc = {
            let state = entry.lock().await;
            state.active.get(correlation_id).cloned()
        };
        let Some(rpc) = rpc else {
            return Err(RouterError::new(ErrorCode::RpcCancelled, "no such in-flight rpc"));
        };
        rpc.cancel_token.cancel();
        let callbacks = std::mem::take(&mut *rpc.on_cancel.lock().await);
        for cb in callbacks {
            cb();
        }
        Ok(())
    }

    /// Cancels every RPC still active on this connection before discarding
    /// its state, so handlers blocked on `cancel_token` wake up instead of
    /// leaking — one of the four cancellation triggers (`onDisconnect`).
    pub fn drop_connection(&self, client_id: ClientId) {
        if let Some((_, conn_state)) = self.conns.remove(&client_id) {
            if let Ok(state) = conn_state.try_lock() {
                for rpc in state.active.values() {
                    rpc.cancel_token.cancel();
                }
            }
        }
    }

    /// One idle-eviction sweep: cancels and completes-as-timed-out any RPC
    /// whose last activity predates `idle_timeout_ms`. Intended to be driven
    /// by a `tokio::time::interval` loop at `cleanup_cadence_ms`.
    pub async fn sweep_idle(&self, now: i64) -> Vec<(ClientId, String)> {
        let snapshot: Vec<(ClientId, Arc<AsyncMutex<RpcConnState>>)> =
            self.conns.iter().map(|e| (*e.key(), e.value().clone())).collect();

        let mut timed_out = Vec::new();
        for (client_id, conn_state) in snapshot {
            let mut state = conn_state.lock().await;
            let expired: Vec<String> = state
                .active
                .iter()
                .filter(|(_, rpc)| now - rpc.last_activity_ms() >= self.idle_timeout_ms)
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                if let Some(rpc) = state.active.remove(&id) {
                    rpc.cancel_token.cancel();
                    timed_out.push((client_id, id));
                }
            }
        }
        timed_out
    }
}
