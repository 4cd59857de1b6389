//! Per-connection topic subscription handle, handed out by
//! [`crate::ext::PubSubContextExt::topics`].

use std::sync::Arc;

use serde_json::json;
use ws_kit_core::adapter::PubSubAdapter;
use ws_kit_core::connection::ClientId;
use ws_kit_core::error::{ErrorCode, RouterError};

use crate::config::TopicLimits;
use crate::registry::TopicRegistry;

pub type NormalizeHook = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type AuthorizeHook = Arc<dyn Fn(ClientId, &str) -> bool + Send + Sync>;
/// Fire-and-forget lifecycle hook. An `Err` is logged; it never rolls back
/// the subscribe/unsubscribe it fired after.
pub type LifecycleHook = Arc<dyn Fn(ClientId, &str) -> Result<(), String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TopicHooks {
    pub normalize: Option<NormalizeHook>,
    pub authorize_subscribe: Option<AuthorizeHook>,
    pub authorize_publish: Option<AuthorizeHook>,
    pub on_subscribe: Option<LifecycleHook>,
    pub on_unsubscribe: Option<LifecycleHook>,
}

/// Cheap-to-clone handle bound to one connection. Every method reads/writes
/// through the shared [`TopicRegistry`] and adapter the installing
/// [`crate::plugin::PubSubPlugin`] stashed on `ctx.extensions`.
#[derive(Clone)]
pub struct Topics {
    client_id: ClientId,
    adapter: Arc<dyn PubSubAdapter>,
    registry: Arc<TopicRegistry>,
    limits: Arc<TopicLimits>,
    hooks: TopicHooks,
}

impl Topics {
    pub(crate) fn new(
        client_id: ClientId,
        adapter: Arc<dyn PubSubAdapter>,
        registry: Arc<TopicRegistry>,
        limits: Arc<TopicLimits>,
        hooks: TopicHooks,
    ) -> Self {
        Self {
            client_id,
            adapter,
            registry,
            limits,
            hooks,
        }
    }

    fn normalize(&self, topic: &str) -> String {
        match &self.hooks.normalize {
            Some(f) => f(topic),
            None => topic.to_string(),
        }
    }

    fn validate(&self, topic: &str) -> Result<(), RouterError> {
        self.limits.validate(topic).map_err(|reason| {
            RouterError::new(ErrorCode::InvalidTopic, format!("topic rejected ({})", reason.as_str()))
                .with_details(json!({ "reason": reason.as_str() }))
        })
    }

    fn authorize_subscribe(&self, topic: &str) -> Result<(), RouterError> {
        match &self.hooks.authorize_subscribe {
            Some(f) if !f(self.client_id, topic) => {
                Err(RouterError::new(ErrorCode::AclSubscribe, format!("subscribe to `{topic}` denied")))
            }
            _ => Ok(()),
        }
    }

    fn run_on_subscribe(&self, topic: &str) {
        if let Some(hook) = &self.hooks.on_subscribe {
            if let Err(e) = hook(self.client_id, topic) {
                tracing::warn!(client_id = %self.client_id, topic, error = %e, "onSubscribe hook failed");
            }
        }
    }

    fn run_on_unsubscribe(&self, topic: &str) {
        if let Some(hook) = &self.hooks.on_unsubscribe {
            if let Err(e) = hook(self.client_id, topic) {
                tracing::warn!(client_id = %self.client_id, topic, error = %e, "onUnsubscribe hook failed");
            }
        }
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), RouterError> {
        let topic = self.normalize(topic);
        self.validate(&topic)?;
        self.authorize_subscribe(&topic)?;
        self.adapter.subscribe(self.client_id, &topic).await?;
        self.registry.insert(self.client_id, &topic);
        self.run_on_subscribe(&topic);
        Ok(())
    }

    /// Validates and authorizes every topic before subscribing to any of
    /// them, so a bad entry in the middle of the list never leaves a partial
    /// subscription behind.
    pub async fn subscribe_many(&self, topics: &[String]) -> Result<(), RouterError> {
        let normalized: Vec<String> = topics.iter().map(|t| self.normalize(t)).collect();
        for t in &normalized {
            self.validate(t)?;
            self.authorize_subscribe(t)?;
        }
        for t in &normalized {
            self.adapter.subscribe(self.client_id, t).await?;
            self.registry.insert(self.client_id, t);
            self.run_on_subscribe(t);
        }
        Ok(())
    }

    /// A soft no-op when `topic` isn't currently subscribed.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), RouterError> {
        let topic = self.normalize(topic);
        if !self.registry.has(self.client_id, &topic) {
            return Ok(());
        }
        self.adapter.unsubscribe(self.client_id, &topic).await?;
        self.registry.remove(self.client_id, &topic);
        self.run_on_unsubscribe(&topic);
        Ok(())
    }

    pub async fn unsubscribe_many(&self, topics: &[String]) -> Result<(), RouterError> {
        for t in topics {
            self.unsubscribe(t).await?;
        }
        Ok(())
    }

    /// Subscribes to exactly `topics`, unsubscribing from everything else
    /// currently held.
    pub async fn replace(&self, topics: &[String]) -> Result<(), RouterError> {
        let normalized: Vec<String> = topics.iter().map(|t| self.normalize(t)).collect();
        for t in &normalized {
            self.validate(t)?;
            self.authorize_subscribe(t)?;
        }
        let (added, removed) = self.registry.replace(self.client_id, &normalized);
        for t in &added {
            self.adapter.subscribe(self.client_id, t).await?;
            self.run_on_subscribe(t);
        }
        for t in &removed {
            self.adapter.unsubscribe(self.client_id, t).await?;
            self.run_on_unsubscribe(t);
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), RouterError> {
        let topics = self.registry.clear(self.client_id);
        for t in &topics {
            self.adapter.unsubscribe(self.client_id, t).await?;
            self.run_on_unsubscribe(t);
        }
        Ok(())
    }

    pub fn has(&self, topic: &str) -> bool {
        self.registry.has(self.client_id, &self.normalize(topic))
    }

    pub fn list(&self) -> Vec<String> {
        self.registry.list(self.client_id)
    }
}
