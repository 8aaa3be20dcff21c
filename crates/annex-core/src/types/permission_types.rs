//! Permission categories and grammar
//!
//! A permission string is one of:
//! - `category:action` where both appear in [`PERMISSION_TABLE`]
//! - `category:*` granting every action in a known category
//! - `all`, honoured only when the runtime runs in development mode

use std::fmt;

/// Literal that grants everything outside production
pub const ALL_PERMISSIONS: &str = "all";

/// Fixed permission-category table
pub const PERMISSION_TABLE: &[(&str, &[&str])] = &[
    ("filesystem", &["read", "write"]),
    ("storage", &["read", "write"]),
    ("secure-storage", &["encrypt", "decrypt"]),
    ("ipc", &["send", "handle"]),
    ("llm", &["chat", "stream"]),
    ("vectordb", &["search", "insert", "delete"]),
    ("mcp", &["execute", "list-tools"]),
    ("tools", &["register"]),
    ("network", &["fetch"]),
    ("ui", &["settings", "notify"]),
];

/// Well-known permission strings checked by the runtime context
pub mod perms {
    pub const STORAGE_READ: &str = "storage:read";
    pub const STORAGE_WRITE: &str = "storage:write";
    pub const SECURE_ENCRYPT: &str = "secure-storage:encrypt";
    pub const SECURE_DECRYPT: &str = "secure-storage:decrypt";
    pub const IPC_SEND: &str = "ipc:send";
    pub const IPC_HANDLE: &str = "ipc:handle";
    pub const LLM_CHAT: &str = "llm:chat";
    pub const LLM_STREAM: &str = "llm:stream";
    pub const VECTORDB_SEARCH: &str = "vectordb:search";
    pub const VECTORDB_INSERT: &str = "vectordb:insert";
    pub const VECTORDB_DELETE: &str = "vectordb:delete";
    pub const MCP_EXECUTE: &str = "mcp:execute";
    pub const MCP_LIST_TOOLS: &str = "mcp:list-tools";
    pub const TOOLS_REGISTER: &str = "tools:register";
}

/// Parsed permission declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PermissionSpec {
    Exact { category: String, action: String },
    Wildcard { category: String },
    All,
}

impl PermissionSpec {
    /// Parse a permission string, returning `None` for malformed input
    ///
    /// Parsing is grammatical only; use [`PermissionSpec::is_known`] to check
    /// the category table.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == ALL_PERMISSIONS {
            return Some(Self::All);
        }
        let (category, action) = raw.split_once(':')?;
        if category.is_empty() || action.is_empty() || action.contains(':') {
            return None;
        }
        if action == "*" {
            Some(Self::Wildcard {
                category: category.to_string(),
            })
        } else {
            Some(Self::Exact {
                category: category.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Whether the declaration refers to entries of the permission table
    pub fn is_known(&self) -> bool {
        match self {
            Self::All => true,
            Self::Wildcard { category } => category_actions(category).is_some(),
            Self::Exact { category, action } => category_actions(category)
                .map(|actions| actions.contains(&action.as_str()))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for PermissionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact { category, action } => write!(f, "{category}:{action}"),
            Self::Wildcard { category } => write!(f, "{category}:*"),
            Self::All => f.write_str(ALL_PERMISSIONS),
        }
    }
}

/// Actions for a category, if the category exists
pub fn category_actions(category: &str) -> Option<&'static [&'static str]> {
    PERMISSION_TABLE
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, actions)| *actions)
}

/// Check whether a permission string is accepted in a manifest
pub fn is_recognised_permission(raw: &str) -> bool {
    PermissionSpec::parse(raw)
        .map(|spec| spec.is_known())
        .unwrap_or(false)
}
