//! Traits through which the core reaches concrete, external collaborators:
//! a transport implementation, a pub/sub backend, and a schema validator.
//! None of the three is implemented here — that's left to adapter crates,
//! `ws-kit-pubsub`, and `ws-kit-validation` respectively.

use serde_json::Value;

use crate::connection::ClientId;
use crate::envelope::OutboundFrame;
use crate::error::RouterError;
use crate::schema::SchemaId;
use crate::BoxFuture;

/// A live WebSocket connection, as seen by the router. Concrete transport
/// adapters (the runtime's actual WebSocket library glue) implement this;
/// the core never depends on any specific transport crate.
pub trait TransportHandle: Send + Sync {
    fn send<'a>(&'a self, frame: OutboundFrame) -> BoxFuture<'a, Result<(), RouterError>>;
    fn close(&self, code: Option<u16>, reason: Option<String>);
}

/// Outcome of validating one payload against a registered schema.
pub enum ParseOutcome {
    Valid(Value),
    Invalid(Value),
}

/// Pluggable schema validation, implemented by `ws-kit-validation` against
/// whatever schema representation that crate chooses (kept out of core so
/// core never depends on a schema-builder library).
pub trait Validator: Send + Sync {
    fn safe_parse(&self, schema: SchemaId, data: &Value) -> ParseOutcome;
}

/// How precisely an adapter can report how many subscribers a publish
/// reached. A single-process in-memory adapter can count exactly; a
/// clustered broker fronting many processes often can only estimate or
/// report nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCapability {
    Exact,
    Estimate,
    Unknown,
}

/// Successful outcome of an adapter-level publish. `matched` is `None`
/// exactly when `capability == Unknown`.
#[derive(Debug, Clone, Copy)]
pub struct PublishAck {
    pub capability: MatchCapability,
    pub matched: Option<u64>,
}

/// Cross-process pub/sub fan-out, implemented by `ws-kit-pubsub` adapters
/// (in-memory, Redis, NATS, …). The core never talks to a broker directly.
pub trait PubSubAdapter: Send + Sync {
    fn publish<'a>(&'a self, topic: &'a str, frame: OutboundFrame) -> BoxFuture<'a, Result<PublishAck, RouterError>>;
    fn subscribe<'a>(&'a self, client_id: ClientId, topic: &'a str) -> BoxFuture<'a, Result<(), RouterError>>;
    fn unsubscribe<'a>(&'a self, client_id: ClientId, topic: &'a str) -> BoxFuture<'a, Result<(), RouterError>>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub struct NoopTransport;

    impl TransportHandle for NoopTransport {
        fn send<'a>(&'a self, _frame: OutboundFrame) -> BoxFuture<'a, Result<(), RouterError>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self, _code: Option<u16>, _reason: Option<String>) {}
    }
}
