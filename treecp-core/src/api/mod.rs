//! Remote tree store module
//!
//! This module defines the narrow interface the transfer engine uses to talk
//! to a remote hierarchical store (stat, listing, batched directory creation,
//! single-shot and chunked uploads, downloads) together with two adapters:
//! a directory-backed store and an in-memory store.

pub mod directory;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use directory::DirectoryStore;
pub use error::{Result, StoreError};
pub use memory::{MemoryStore, StoreCall};
pub use store::{BoxDownload, BoxUpload, ErrorSink, RemoteStore, UploadStream};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/dest/a/"), "dest/a");
        assert_eq!(normalize_path("dest//a/./b"), "dest/a/b");
        assert_eq!(normalize_path("/"), "");
    }

    #[test]
    fn test_split_pattern() {
        assert_eq!(split_pattern("dest/a/*"), ("dest/a".to_string(), "*".to_string()));
        assert_eq!(split_pattern("/dest/*.txt"), ("dest".to_string(), "*.txt".to_string()));
        assert_eq!(split_pattern("*"), (String::new(), "*".to_string()));
        assert_eq!(split_pattern("dest"), ("dest".to_string(), "*".to_string()));
    }

    #[test]
    fn test_tree_node_wire_format() {
        let json = r#"{"path":"docs/report.pdf","type":"LEAF","size":"42","mtime":"1700000000"}"#;
        let node: TreeNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.node_type, NodeType::Leaf);
        assert_eq!(node.name(), "report.pdf");
        assert!(!node.is_collection());

        let dir = TreeNode::collection("docs");
        let encoded = serde_json::to_string(&dir).unwrap();
        assert!(encoded.contains(r#""type":"COLLECTION""#));
    }

    #[test]
    fn test_error_not_found() {
        assert!(StoreError::NotFound("x".to_string()).is_not_found());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(StoreError::Io(io).is_not_found());
        assert!(!StoreError::Unavailable("down".to_string()).is_not_found());
    }
}
