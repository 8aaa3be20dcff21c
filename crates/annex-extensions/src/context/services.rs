//! Host service contracts and their permission-checked proxies
//!
//! The runtime does not implement model inference, vector search or
//! external tools. It consumes them through these traits and hands each
//! extension a proxy that checks the relevant permission before forwarding.

use annex_core::types::perms;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{ContextError, Gate};

/// Stream of response chunks from a streaming chat
pub type ChatStream = BoxStream<'static, anyhow::Result<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: None,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

/// Model-inference provider
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatResponse>;

    async fn stream_chat(&self, request: ChatRequest) -> anyhow::Result<ChatStream>;
}

/// Vector-search provider
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, query: &str, options: SearchOptions) -> anyhow::Result<Vec<SearchResult>>;

    async fn insert(&self, documents: Vec<VectorDocument>) -> anyhow::Result<()>;

    async fn delete(&self, ids: Vec<String>) -> anyhow::Result<()>;
}

/// External tool-invocation provider (MCP servers)
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn execute(&self, tool_name: &str, args: Value) -> anyhow::Result<Value>;

    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>>;
}

fn unavailable(service: &'static str) -> ContextError {
    ContextError::ServiceUnavailable { service }
}

/// Proxy to the model provider
#[derive(Clone)]
pub struct ModelProxy {
    gate: Arc<Gate>,
    provider: Option<Arc<dyn ModelProvider>>,
}

impl ModelProxy {
    pub(crate) fn new(gate: Arc<Gate>, provider: Option<Arc<dyn ModelProvider>>) -> Self {
        Self { gate, provider }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ContextError> {
        self.gate.check(perms::LLM_CHAT)?;
        let provider = self.provider.as_ref().ok_or_else(|| unavailable("llm"))?;
        provider.chat(request).await.map_err(ContextError::service)
    }

    pub async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ContextError> {
        self.gate.check(perms::LLM_STREAM)?;
        let provider = self.provider.as_ref().ok_or_else(|| unavailable("llm"))?;
        provider
            .stream_chat(request)
            .await
            .map_err(ContextError::service)
    }
}

/// Proxy to the vector store
#[derive(Clone)]
pub struct VectorProxy {
    gate: Arc<Gate>,
    store: Option<Arc<dyn VectorStore>>,
}

impl VectorProxy {
    pub(crate) fn new(gate: Arc<Gate>, store: Option<Arc<dyn VectorStore>>) -> Self {
        Self { gate, store }
    }

    fn store(&self) -> Result<&Arc<dyn VectorStore>, ContextError> {
        self.store.as_ref().ok_or_else(|| unavailable("vectordb"))
    }

    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<SearchResult>, ContextError> {
        self.gate.check(perms::VECTORDB_SEARCH)?;
        self.store()?
            .search(query, options)
            .await
            .map_err(ContextError::service)
    }

    pub async fn insert(&self, documents: Vec<VectorDocument>) -> Result<(), ContextError> {
        self.gate.check(perms::VECTORDB_INSERT)?;
        self.store()?
            .insert(documents)
            .await
            .map_err(ContextError::service)
    }

    pub async fn delete(&self, ids: Vec<String>) -> Result<(), ContextError> {
        self.gate.check(perms::VECTORDB_DELETE)?;
        self.store()?.delete(ids).await.map_err(ContextError::service)
    }
}

/// Proxy to external tool servers
#[derive(Clone)]
pub struct McpProxy {
    gate: Arc<Gate>,
    invoker: Option<Arc<dyn ToolInvoker>>,
}

impl McpProxy {
    pub(crate) fn new(gate: Arc<Gate>, invoker: Option<Arc<dyn ToolInvoker>>) -> Self {
        Self { gate, invoker }
    }

    fn invoker(&self) -> Result<&Arc<dyn ToolInvoker>, ContextError> {
        self.invoker.as_ref().ok_or_else(|| unavailable("mcp"))
    }

    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, ContextError> {
        self.gate.check(perms::MCP_EXECUTE)?;
        self.invoker()?
            .execute(tool_name, args)
            .await
            .map_err(ContextError::service)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ContextError> {
        self.gate.check(perms::MCP_LIST_TOOLS)?;
        self.invoker()?
            .list_tools()
            .await
            .map_err(ContextError::service)
    }
}
