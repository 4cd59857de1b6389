//! Wire envelope shape and the two reserved system message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `__heartbeat` keeps idle connections alive; handled in `dispatch::classify`
/// before route lookup, never reaching user handlers.
pub const HEARTBEAT_TYPE: &str = "__heartbeat";
/// Reply to `__heartbeat`, carrying the server's own clock.
pub const HEARTBEAT_ACK_TYPE: &str = "__heartbeat_ack";
/// `__close` requests a graceful close; also short-circuited in `classify`.
pub const CLOSE_TYPE: &str = "__close";

/// Returns `true` for any type string a user handler may never claim:
/// `__`-prefixed (system) or `$`-prefixed (RPC control frames: progress/error).
pub fn is_reserved_type(type_name: &str) -> bool {
    type_name.starts_with("__") || type_name.starts_with('$')
}

/// Inbound envelope, parsed from one WebSocket text/binary frame.
///
/// `deny_unknown_fields` enforces "no other top-level keys permitted" —
/// anything beyond `type`/`meta`/`payload` fails to deserialize and is
/// classified as `INVALID_ENVELOPE`, not `PARSE_ERROR` (the JSON itself was
/// syntactically valid).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub meta: InboundMeta,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Client-settable metadata. `clientId`/`receivedAt` are accepted on the wire
/// (a naive client may echo them back) but deliberately have no field here to
/// land in — they're read once into local bindings in `classify` and then
/// dropped, never trusted. Server-authoritative values live on `Context`
/// instead, set directly by the router.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMeta {
    #[serde(rename = "correlationId", default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Metadata attached to outbound frames. Never carries `clientId` — a
/// connection always knows its own id; broadcasting it back would leak
/// routing internals to other subscribers on a shared topic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboundMeta {
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: i64,
}

/// One frame ready to hand to a `TransportHandle`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub meta: OutboundMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_top_level_keys() {
        let raw = r#"{"type":"PING","meta":{},"payload":null,"extra":1}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[test]
    fn ignores_client_supplied_reserved_meta_fields() {
        let raw = r#"{"type":"PING","meta":{"clientId":"evil","receivedAt":1}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert!(env.meta.correlation_id.is_none());
    }

    #[test]
    fn reserved_prefixes() {
        assert!(is_reserved_type("__heartbeat"));
        assert!(is_reserved_type("$ws:rpc-error"));
        assert!(!is_reserved_type("GET_USER"));
    }
}
