//! Named tools contributed by extensions

use annex_core::types::perms;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use super::services::ToolDescriptor;
use super::{ContextError, Gate};

/// A tool an extension exposes to the host
#[async_trait]
pub trait ExtensionTool: Send + Sync {
    /// Local name; the registry qualifies it with the owner's id
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Tool registry owned by one extension
///
/// Names are stored as `<extension-id>:<name>`, so tools from different
/// extensions never collide.
#[derive(Clone)]
pub struct ToolRegistry {
    gate: Arc<Gate>,
    tools: Arc<RwLock<BTreeMap<String, Arc<dyn ExtensionTool>>>>,
}

impl ToolRegistry {
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            tools: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn qualify(&self, name: &str) -> String {
        format!("{}:{}", self.gate.extension_id(), name)
    }

    /// Register a tool and return its qualified name
    pub fn register(&self, tool: Arc<dyn ExtensionTool>) -> Result<String, ContextError> {
        self.gate.check(perms::TOOLS_REGISTER)?;
        let name = tool.name();
        if name.is_empty() || name.contains(':') {
            return Err(ContextError::InvalidName {
                name: name.to_string(),
            });
        }
        let qualified = self.qualify(name);

        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&qualified) {
            return Err(ContextError::AlreadyRegistered { name: qualified });
        }
        debug!(extension = %self.gate.extension_id(), tool = %qualified, "Registered tool");
        tools.insert(qualified.clone(), tool);
        Ok(qualified)
    }

    pub fn unregister(&self, name: &str) -> Result<bool, ContextError> {
        self.gate.check(perms::TOOLS_REGISTER)?;
        let qualified = self.qualify(name);
        Ok(self
            .tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&qualified)
            .is_some())
    }

    /// Qualified names, sorted
    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, tool)| ToolDescriptor {
                name: name.clone(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Call a tool by qualified name
    pub async fn call(&self, qualified: &str, args: Value) -> Result<Value, ContextError> {
        self.gate.ensure_live()?;
        let tool = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(qualified)
            .cloned()
            .ok_or_else(|| ContextError::InvalidName {
                name: qualified.to_string(),
            })?;
        tool.call(args).await.map_err(ContextError::service)
    }

    pub(crate) fn clear(&self) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
