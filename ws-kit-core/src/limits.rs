//! Admission control: payload size and per-connection in-flight caps.

use crate::connection::ConnectionState;

#[derive(Debug, Clone, Copy)]
pub struct LimitsManager {
    pub max_payload_bytes: usize,
    pub max_pending_per_connection: usize,
}

impl Default for LimitsManager {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1 << 20,
            max_pending_per_connection: 64,
        }
    }
}

impl LimitsManager {
    pub fn new(max_payload_bytes: usize, max_pending_per_connection: usize) -> Self {
        Self {
            max_payload_bytes,
            max_pending_per_connection,
        }
    }

    pub fn payload_within_limit(&self, raw_len: usize) -> bool {
        raw_len <= self.max_payload_bytes
    }

    /// Reserves one in-flight slot on `conn` if under the cap. Caller must
    /// release it (`conn.release()`) once the dispatch it admitted for
    /// finishes, success or not.
    pub fn try_admit<S>(&self, conn: &ConnectionState<S>) -> bool {
        conn.try_admit(self.max_pending_per_connection)
    }
}
