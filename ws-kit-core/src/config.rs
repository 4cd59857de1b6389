//! Router configuration.
//!
//! A plain `Default + Clone` struct with a fluent builder, not a layered
//! YAML/env-file resolver like the teacher's `R2eConfig` — this is a
//! library with no CLI and no deployment-time files to merge, so the extra
//! machinery in `r2e-core::config` has no job to do here. Every field below
//! corresponds to a row in the options table.

use crate::heartbeat::HeartbeatConfig;
use crate::limits::LimitsManager;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub max_active_per_connection: usize,
    pub idle_timeout_ms: i64,
    pub dedup_window_size: usize,
    /// TTL a completed correlation id stays in the dedup window, regardless
    /// of `dedup_window_size` — whichever bound is hit first evicts it.
    pub dedup_window_ms: i64,
    pub cleanup_cadence_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_active_per_connection: 32,
            idle_timeout_ms: 30_000,
            dedup_window_size: 256,
            dedup_window_ms: 60_000,
            cleanup_cadence_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub limits: LimitsManager,
    pub heartbeat: HeartbeatConfig,
    pub rpc: RpcConfig,
    /// Whether outbound frames are validated against a registered response
    /// schema by default when the validation plugin is installed. Schemas
    /// may override this per-message via `SchemaOpts::validate_outgoing`.
    pub validate_outgoing_default: bool,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.limits.max_payload_bytes = bytes;
        self
    }

    pub fn with_max_pending_per_connection(mut self, n: usize) -> Self {
        self.limits.max_pending_per_connection = n;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_rpc(mut self, rpc: RpcConfig) -> Self {
        self.rpc = rpc;
        self
    }

    pub fn with_validate_outgoing_default(mut self, enabled: bool) -> Self {
        self.validate_outgoing_default = enabled;
        self
    }
}
