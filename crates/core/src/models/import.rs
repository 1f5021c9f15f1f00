//! ImportPath, BlockedHash, UserPreference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPath {
    pub id: String,
    pub path: String,
    pub display_name: String,
    pub enabled: bool,
    pub exclusion_patterns: Vec<String>,
    pub last_scanned: Option<DateTime<Utc>>,
    pub book_count: u64,
    pub total_size: u64,
}

impl ImportPath {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            display_name: path.clone(),
            path,
            enabled: true,
            exclusion_patterns: Vec::new(),
            last_scanned: None,
            book_count: 0,
            total_size: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedHash {
    pub hash: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub key: String,
    pub value: String,
}
