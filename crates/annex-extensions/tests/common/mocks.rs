//! Mock extension definitions and services

#![allow(dead_code)]

use annex_extensions::context::{
    IpcHandle, SearchOptions, SearchResult, VectorDocument, VectorStore,
};
use annex_extensions::{ContextError, Diagnosis, ExtensionDefinition, RuntimeContext};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared log of hook calls, `"<id>:<hook>"`
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.calls().iter().filter(|c| *c == entry).count()
    }

    /// Position of the first matching call
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == entry)
    }
}

/// How a [`MockDefinition`] behaves on activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
    Hang,
    /// Sleep before succeeding
    Slow(Duration),
}

/// Configurable extension definition that records its hook calls
pub struct MockDefinition {
    id: String,
    log: CallLog,
    behaviour: Behaviour,
    activations: AtomicUsize,
    self_check: Option<Diagnosis>,
    ipc_channel: Option<String>,
    stop_delay: Option<Duration>,
}

impl MockDefinition {
    pub fn new(id: &str, log: &CallLog) -> Self {
        Self {
            id: id.to_string(),
            log: log.clone(),
            behaviour: Behaviour::Succeed,
            activations: AtomicUsize::new(0),
            self_check: None,
            ipc_channel: None,
            stop_delay: None,
        }
    }

    pub fn behaving(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    /// Sleep in the deactivation hook
    pub fn slow_to_stop(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    pub fn with_self_check(mut self, diagnosis: Diagnosis) -> Self {
        self.self_check = Some(diagnosis);
        self
    }

    /// Register an echo handler on this channel at registration time
    pub fn with_ipc_echo(mut self, name: &str) -> Self {
        self.ipc_channel = Some(name.to_string());
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtensionDefinition for MockDefinition {
    async fn activate(&self, ctx: Arc<RuntimeContext>) -> anyhow::Result<()> {
        assert_eq!(ctx.extension_id(), self.id);
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("{}:activate", self.id));
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => anyhow::bail!("{} refused to start", self.id),
            Behaviour::Panic => panic!("{} blew up", self.id),
            Behaviour::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    async fn deactivate(&self) -> anyhow::Result<()> {
        self.log.record(format!("{}:deactivate", self.id));
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn clear_session(&self) -> anyhow::Result<()> {
        self.log.record(format!("{}:clear_session", self.id));
        Ok(())
    }

    fn register_ipc_handlers(&self, ipc: &IpcHandle) -> Result<(), ContextError> {
        if let Some(name) = &self.ipc_channel {
            ipc.handle(name, |payload: Value| async move { Ok::<_, anyhow::Error>(json!({ "echo": payload })) })?;
        }
        Ok(())
    }

    fn store_slice(&self) -> Option<Value> {
        Some(json!({ "id": self.id }))
    }

    async fn self_check(&self) -> Option<Diagnosis> {
        self.self_check.clone()
    }
}

/// In-memory vector store
#[derive(Default)]
pub struct MemoryVectorStore {
    documents: Mutex<Vec<VectorDocument>>,
}

impl MemoryVectorStore {
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(&self, query: &str, options: SearchOptions) -> anyhow::Result<Vec<SearchResult>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.content.contains(query))
            .take(options.limit)
            .map(|d| SearchResult {
                id: d.id.clone(),
                score: 1.0,
                content: d.content.clone(),
                metadata: d.metadata.clone(),
            })
            .collect())
    }

    async fn insert(&self, documents: Vec<VectorDocument>) -> anyhow::Result<()> {
        self.documents.lock().unwrap().extend(documents);
        Ok(())
    }

    async fn delete(&self, ids: Vec<String>) -> anyhow::Result<()> {
        self.documents.lock().unwrap().retain(|d| !ids.contains(&d.id));
        Ok(())
    }
}
