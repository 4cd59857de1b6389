//! Core dispatch pipeline, plugin host, and RPC lifecycle manager for a
//! platform-agnostic WebSocket message router.
//!
//! This crate owns the route table, the middleware/enhancer chains, the
//! capability-gated plugin model, and correlation-id tracking for
//! request/response RPC. It never talks to an actual WebSocket library, a
//! schema validation library, or a pub/sub broker directly — those are
//! reached through the traits in [`adapter`], implemented by downstream
//! adapter crates and by the `ws-kit-validation`/`ws-kit-pubsub` plugins.

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod adapter;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;
pub mod plugin;
pub mod prelude;
pub mod route;
pub mod router;
pub mod rpc;
pub mod schema;

pub use router::Router;
