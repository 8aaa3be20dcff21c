//! Inter-process messaging with per-extension channel namespaces
//!
//! Extensions name channels locally; the handle prefixes every name with
//! `<extension-id>:` so one extension cannot register or emit on another's
//! channel.

use annex_core::types::perms;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ContextError, Gate};

/// Request handler for one channel
pub type IpcHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Event published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcMessage {
    pub channel: String,
    pub source: String,
    pub payload: Value,
}

const EVENT_CAPACITY: usize = 256;

/// Host-wide message bus
pub struct MessageBus {
    handlers: RwLock<HashMap<String, IpcHandler>>,
    events: broadcast::Sender<IpcMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Qualified channel name for an extension-local name
    pub fn channel_name(extension_id: &str, name: &str) -> String {
        format!("{extension_id}:{name}")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IpcMessage> {
        self.events.subscribe()
    }

    /// Registered channels, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    /// Invoke a qualified channel from the host side
    pub async fn invoke(&self, channel: &str, payload: Value) -> Result<Value, ContextError> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
            .ok_or_else(|| ContextError::HandlerNotFound {
                channel: channel.to_string(),
            })?;
        handler(payload).await.map_err(ContextError::service)
    }

    fn register(&self, channel: String, handler: IpcHandler) -> Result<(), ContextError> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&channel) {
            return Err(ContextError::AlreadyRegistered { name: channel });
        }
        debug!(channel = %channel, "Registered IPC handler");
        handlers.insert(channel, handler);
        Ok(())
    }

    fn unregister(&self, channel: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel)
            .is_some()
    }

    fn publish(&self, message: IpcMessage) {
        // No subscribers is fine
        let _ = self.events.send(message);
    }

    /// Drop every handler owned by an extension
    pub fn remove_namespace(&self, extension_id: &str) {
        let prefix = format!("{extension_id}:");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|channel, _| !channel.starts_with(&prefix));
    }
}

/// Messaging handle bound to one extension
#[derive(Clone)]
pub struct IpcHandle {
    gate: Arc<Gate>,
    bus: Arc<MessageBus>,
}

impl IpcHandle {
    pub(crate) fn new(gate: Arc<Gate>, bus: Arc<MessageBus>) -> Self {
        Self { gate, bus }
    }

    /// Qualified name of a local channel
    pub fn channel(&self, name: &str) -> String {
        MessageBus::channel_name(self.gate.extension_id(), name)
    }

    /// Register a handler on `<extension-id>:<name>`
    pub fn handle<F, Fut>(&self, name: &str, handler: F) -> Result<String, ContextError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.gate.check(perms::IPC_HANDLE)?;
        validate_name(name)?;
        let channel = self.channel(name);
        let handler: IpcHandler = Arc::new(move |payload| Box::pin(handler(payload)));
        self.bus.register(channel.clone(), handler)?;
        Ok(channel)
    }

    pub fn remove_handler(&self, name: &str) -> Result<bool, ContextError> {
        self.gate.check(perms::IPC_HANDLE)?;
        Ok(self.bus.unregister(&self.channel(name)))
    }

    /// Publish an event on `<extension-id>:<name>`
    pub fn emit(&self, name: &str, payload: Value) -> Result<(), ContextError> {
        self.gate.check(perms::IPC_SEND)?;
        validate_name(name)?;
        self.bus.publish(IpcMessage {
            channel: self.channel(name),
            source: self.gate.extension_id().to_string(),
            payload,
        });
        Ok(())
    }

    /// Call a handler by qualified name, possibly owned by another extension
    pub async fn invoke(&self, channel: &str, payload: Value) -> Result<Value, ContextError> {
        self.gate.check(perms::IPC_SEND)?;
        self.bus.invoke(channel, payload).await
    }
}

fn validate_name(name: &str) -> Result<(), ContextError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ContextError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
