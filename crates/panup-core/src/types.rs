use serde::{Deserialize, Serialize};

use crate::path::ROOT_ID;

/// A file or folder in the remote tree, as last reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
    /// Seconds since the Unix epoch.
    pub updated_at: i64,
}

impl RemoteNode {
    /// Synthetic node for the tree root; the service never lists it.
    pub fn root() -> Self {
        Self {
            id: ROOT_ID.to_string(),
            name: String::new(),
            size: 0,
            is_dir: true,
            created_at: 0,
            updated_at: 0,
        }
    }
}

/// Converts a millisecond timestamp as sent by the service into seconds.
pub fn millis_to_secs(ms: i64) -> i64 {
    ms / 1000
}
