//! Destination resolution

use tracing::debug;

use crate::error::{Result, TransferError};
use crate::node::{Node, NodePath, TreePath};
use crate::session::TransferSession;

/// Compute the destination root for copying `source` to `target`.
///
/// With `rename` a directory lands exactly at `target` and a file takes the
/// base name of `target`; without it the source keeps its own name inside
/// `target`.
pub fn resolve_target(target: &NodePath, source: &Node, rename: bool) -> Node {
    let (path, rename_to) = match (source.is_dir(), rename) {
        (true, true) => (target.clone(), None),
        (true, false) => (target.join(&source.base()), None),
        (false, true) => (target.dir(), Some(target.base())),
        (false, false) => (target.clone(), None),
    };

    Node::new(path, source.is_dir(), source.modified(), 0).with_rename(rename_to)
}

/// Decide whether copying `source` to `target` renames it.
///
/// A file is renamed unless the target is an existing directory. A
/// directory is renamed when the target does not exist yet.
pub async fn detect_rename(session: &TransferSession, source: &Node, target: &NodePath) -> Result<bool> {
    let existing = match target {
        NodePath::Local(path) => match tokio::fs::metadata(path.as_path()).await {
            Ok(metadata) => Some(metadata.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(TransferError::io(path.as_path(), e)),
        },
        NodePath::Remote(path) => session
            .store()
            .stat_node(path.as_str())
            .await
            .map_err(TransferError::store_unavailable)?
            .map(|node| node.is_collection()),
    };

    let rename = match (source.is_dir(), existing) {
        (true, existing) => existing.is_none(),
        (false, Some(true)) => false,
        (false, _) => true,
    };
    debug!("Target {} exists: {:?}, rename: {}", target, existing, rename);
    Ok(rename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;
    use std::sync::Arc;
    use treecp_core::MemoryStore;

    use crate::session::TransferOptions;

    fn local_source(path: &str, is_dir: bool) -> Node {
        Node::new(NodePath::local(path), is_dir, Utc::now(), 0)
    }

    #[rstest]
    #[case::dir_renamed(true, true, NodePath::remote("dest/b"), None)]
    #[case::dir_nested(true, false, NodePath::remote("dest/b/a"), None)]
    #[case::file_renamed(false, true, NodePath::remote("dest"), Some("b"))]
    #[case::file_into_dir(false, false, NodePath::remote("dest/b"), None)]
    fn test_resolve_target(
        #[case] is_dir: bool,
        #[case] rename: bool,
        #[case] expected: NodePath,
        #[case] rename_to: Option<&str>,
    ) {
        let source = local_source("/data/a", is_dir);
        let target = resolve_target(&NodePath::remote("dest/b"), &source, rename);
        assert_eq!(target.path(), &expected);
        assert_eq!(target.rename_to(), rename_to);
        assert_eq!(target.is_dir(), is_dir);
    }

    #[rstest]
    #[case::file_to_missing(false, None, true)]
    #[case::file_to_existing_dir(false, Some(true), false)]
    #[case::file_over_file(false, Some(false), true)]
    #[case::dir_to_missing(true, None, true)]
    #[case::dir_to_existing_dir(true, Some(true), false)]
    #[tokio::test]
    async fn test_detect_rename_remote(
        #[case] source_is_dir: bool,
        #[case] existing: Option<bool>,
        #[case] expected: bool,
    ) {
        let store = MemoryStore::new();
        match existing {
            Some(true) => store.insert_dir("dest/b"),
            Some(false) => store.insert_file("dest/b", b"x".to_vec()),
            None => {}
        }
        let session = TransferSession::new(Arc::new(store), TransferOptions::default());

        let source = local_source("/data/a", source_is_dir);
        let rename = detect_rename(&session, &source, &NodePath::remote("dest/b"))
            .await
            .unwrap();
        assert_eq!(rename, expected);
    }

    #[tokio::test]
    async fn test_detect_rename_local() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let session = TransferSession::new(Arc::new(MemoryStore::new()), TransferOptions::default());
        let source = Node::from_remote_entry(&treecp_core::TreeNode::leaf("src/a.txt", 1, 0));

        let into_dir = NodePath::local(temp_dir.path());
        assert!(!detect_rename(&session, &source, &into_dir).await.unwrap());

        let new_name = NodePath::local(temp_dir.path().join("b.txt"));
        assert!(detect_rename(&session, &source, &new_name).await.unwrap());
    }
}
