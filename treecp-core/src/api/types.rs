use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key under which a chunked upload records the content hash.
pub const CONTENT_HASH_KEY: &str = "x-content-sha256";

/// Type tag of a remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Collection,
    Leaf,
}

/// One entry of the remote tree, as returned by stat and listing calls.
///
/// Size and modification time travel as decimal strings; callers parse them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub mtime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl TreeNode {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            node_type: NodeType::Collection,
            size: "0".to_string(),
            mtime: String::new(),
            etag: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn leaf(path: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            path: path.into(),
            node_type: NodeType::Leaf,
            size: size.to_string(),
            mtime: mtime.to_string(),
            etag: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = mtime.to_string();
        self
    }

    pub fn is_collection(&self) -> bool {
        self.node_type == NodeType::Collection
    }

    /// Last segment of the path
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// Options of a single-shot upload
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Expected number of bytes, when known
    pub content_length: Option<u64>,
    /// Extra metadata stored with the node
    pub metadata: BTreeMap<String, String>,
}

impl PutOptions {
    pub fn with_length(length: u64) -> Self {
        Self {
            content_length: Some(length),
            ..Default::default()
        }
    }
}

/// Canonical form of a remote path: no leading or trailing slash, no empty segments.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a listing pattern such as `dir/sub/*` into its directory and child glob.
pub fn split_pattern(pattern: &str) -> (String, String) {
    let trimmed = pattern.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, glob)) => (normalize_path(dir), glob.to_string()),
        None if trimmed.contains(['*', '?', '[']) => (String::new(), trimmed.to_string()),
        None => (normalize_path(trimmed), "*".to_string()),
    }
}

/// Parent of a canonical remote path, `""` for top-level entries.
pub fn parent_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}
