//! Error sink and connection/dispatch observers.
//!
//! Every fallible step of dispatch funnels through `LifecycleManager::report`
//! instead of propagating a `Result` to the transport adapter — per spec §7,
//! an error never causes a close by default, it's just surfaced.

use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use crate::connection::ClientId;
use crate::context::Context;
use crate::error::RouterError;

/// Observes connection and dispatch lifecycle events. All methods have a
/// no-op default so an observer only needs to implement what it cares about.
pub trait Observer<S>: Send + Sync {
    fn on_open(&self, _client_id: ClientId) {}
    fn on_message(&self, _ctx: &Context<S>) {}
    fn on_error(&self, _err: &RouterError, _ctx: Option<&Context<S>>) {}
    fn on_close(&self, _client_id: ClientId) {}
}

type ErrorSink<S> = Box<dyn Fn(&RouterError, Option<&Context<S>>) + Send + Sync>;

pub struct LifecycleManager<S> {
    error_sink: RwLock<Option<ErrorSink<S>>>,
    observers: RwLock<Vec<Arc<dyn Observer<S>>>>,
}

impl<S> Default for LifecycleManager<S> {
    fn default() -> Self {
        Self {
            error_sink: RwLock::new(None),
            observers: RwLock::new(Vec::new()),
        }
    }
}

impl<S> LifecycleManager<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error_sink(&self, sink: impl Fn(&RouterError, Option<&Context<S>>) + Send + Sync + 'static) {
        *self.error_sink.write().expect("error sink lock poisoned") = Some(Box::new(sink));
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer<S>>) {
        self.observers.write().expect("observer lock poisoned").push(observer);
    }

    /// Routes one error to the configured sink (if any) and to every
    /// observer's `on_error`. Always logs via `tracing` regardless, so a
    /// deployment with no sink configured still sees errors in its logs.
    pub fn report(&self, err: RouterError, ctx: Option<&Context<S>>) {
        if err.retryable {
            warn!(code = %err.code, message = %err.message, "router error (retryable)");
        } else {
            error!(code = %err.code, message = %err.message, "router error");
        }
        if let Some(sink) = self.error_sink.read().expect("error sink lock poisoned").as_ref() {
            sink(&err, ctx);
        }
        for obs in self.observers.read().expect("observer lock poisoned").iter() {
            obs.on_error(&err, ctx);
        }
    }

    pub fn notify_open(&self, client_id: ClientId) {
        for obs in self.observers.read().expect("observer lock poisoned").iter() {
            obs.on_open(client_id);
        }
    }

    pub fn notify_message(&self, ctx: &Context<S>) {
        for obs in self.observers.read().expect("observer lock poisoned").iter() {
            obs.on_message(ctx);
        }
    }

    pub fn notify_close(&self, client_id: ClientId) {
        for obs in self.observers.read().expect("observer lock poisoned").iter() {
            obs.on_close(client_id);
        }
    }
}
