use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// Extension entered the registry
    Registered {
        extension_id: String,
        version: String,
        timestamp: DateTime<Utc>,
    },

    /// Activation hook completed
    Activated {
        extension_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Activation hook failed or timed out; the extension stays registered
    ActivationFailed {
        extension_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Extension returned to the registered state
    Deactivated {
        extension_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Extension removed from the registry
    Unregistered {
        extension_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The set of active extensions changed
    ActiveSetChanged { active: Vec<String> },
}

impl RegistryEvent {
    /// Extension this event concerns, if any
    pub fn extension_id(&self) -> Option<&str> {
        match self {
            Self::Registered { extension_id, .. }
            | Self::Activated { extension_id, .. }
            | Self::ActivationFailed { extension_id, .. }
            | Self::Deactivated { extension_id, .. }
            | Self::Unregistered { extension_id, .. } => Some(extension_id),
            Self::ActiveSetChanged { .. } => None,
        }
    }
}
