//! Destination directory creation

use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, TransferError};
use crate::node::{LocalPath, Node, NodePath, RemotePath, TreePath};
use crate::progress::IndicatorPool;
use crate::session::TransferSession;

/// Creates the directory skeleton of a transfer before any file is copied
pub struct DirectoryPlanner {
    session: TransferSession,
}

impl DirectoryPlanner {
    pub fn new(session: TransferSession) -> Self {
        Self { session }
    }

    /// Make sure every directory of `nodes` exists below `target`.
    ///
    /// Each created directory counts as one done node on the pool.
    pub async fn ensure_directories(
        &self,
        target: &Node,
        nodes: &[Node],
        pool: &IndicatorPool,
    ) -> Result<()> {
        let directories: Vec<&Node> = nodes.iter().filter(|node| node.is_dir()).collect();
        info!(
            "Preparing {} directories under {}",
            directories.len(),
            target.path()
        );

        match target.path() {
            NodePath::Local(root) => self.ensure_local(root, &directories, pool).await,
            NodePath::Remote(root) => self.ensure_remote(root, &directories, pool).await,
        }
    }

    async fn ensure_local(
        &self,
        root: &LocalPath,
        directories: &[&Node],
        pool: &IndicatorPool,
    ) -> Result<()> {
        if tokio::fs::metadata(root.as_path()).await.is_err() {
            self.create_local(root.as_path()).await?;
        }

        for directory in directories {
            let folder = root.join(directory.relative_path());
            self.create_local(folder.as_path()).await?;
            pool.done();
        }
        Ok(())
    }

    async fn create_local(&self, path: &Path) -> Result<()> {
        if self.session.dry_run() {
            info!("Would create directory {}", path.display());
            return Ok(());
        }
        debug!("Creating directory {}", path.display());
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| TransferError::io(path, e))
    }

    async fn ensure_remote(
        &self,
        root: &RemotePath,
        directories: &[&Node],
        pool: &IndicatorPool,
    ) -> Result<()> {
        let store = self.session.store();
        let mut batch = Vec::with_capacity(directories.len() + 1);

        let create_root = match store
            .stat_node(root.as_str())
            .await
            .map_err(TransferError::store_unavailable)?
        {
            None => {
                batch.push(root.as_str().to_string());
                true
            }
            Some(existing) if !existing.is_collection() => {
                return Err(TransferError::conflict(
                    root.as_str(),
                    "a file already exists where the destination directory should be",
                ));
            }
            Some(_) => false,
        };

        for directory in directories {
            if create_root && directory.relative_path().is_empty() {
                continue;
            }
            batch.push(root.join(directory.relative_path()).as_str().to_string());
        }

        if batch.is_empty() {
            return Ok(());
        }

        if self.session.dry_run() {
            for path in &batch {
                info!("Would create remote directory {}", path);
                pool.done();
            }
            return Ok(());
        }

        debug!("Creating {} remote directories", batch.len());
        store.create_directories(&batch).await.map_err(|e| match e {
            conflict @ treecp_core::StoreError::Conflict { .. } => TransferError::from(conflict),
            other => TransferError::store_unavailable(other),
        })?;
        batch.iter().for_each(|_| pool.done());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use treecp_core::{MemoryStore, TreeNode};
    use treecp_core::api::StoreCall;

    use crate::session::TransferOptions;

    fn session(store: Arc<MemoryStore>, dry_run: bool) -> TransferSession {
        let options = TransferOptions {
            dry_run,
            ..TransferOptions::default()
        };
        TransferSession::new(store, options)
    }

    fn remote_dirs(root: &str, relative: &[&str]) -> Vec<Node> {
        relative
            .iter()
            .map(|rel| {
                let path = RemotePath::new(root).join(rel);
                Node::from_remote_entry(&TreeNode::collection(path.as_str())).with_relative_path(*rel)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_remote_batch_skips_fresh_root() {
        let store = Arc::new(MemoryStore::new());
        let planner = DirectoryPlanner::new(session(store.clone(), false));
        let target = Node::from_remote_entry(&TreeNode::collection("dest/a"));
        let nodes = remote_dirs("src/a", &["", "sub"]);
        let pool = IndicatorPool::new(true, nodes.len() as u64, 3);

        planner.ensure_directories(&target, &nodes, &pool).await.unwrap();

        let creates: Vec<_> = store
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::CreateDirectories(paths) => Some(paths),
                _ => None,
            })
            .collect();
        assert_eq!(creates, vec![vec!["dest/a".to_string(), "dest/a/sub".to_string()]]);
        assert!(store.is_dir("dest/a/sub"));
        assert!(pool.aggregate().unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_remote_existing_root_is_not_recreated() {
        let store = Arc::new(MemoryStore::new());
        store.insert_dir("dest");
        let planner = DirectoryPlanner::new(session(store.clone(), false));
        let target = Node::from_remote_entry(&TreeNode::collection("dest"));
        let nodes = remote_dirs("src", &["", "docs"]);
        let pool = IndicatorPool::new(true, nodes.len() as u64, 3);

        planner.ensure_directories(&target, &nodes, &pool).await.unwrap();
        planner.ensure_directories(&target, &nodes, &pool).await.unwrap();

        assert!(store.is_dir("dest/docs"));
        assert!(matches!(
            store.calls().last(),
            Some(StoreCall::CreateDirectories(paths)) if paths == &vec!["dest".to_string(), "dest/docs".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_remote_file_at_root_conflicts() {
        let store = Arc::new(MemoryStore::new());
        store.insert_file("dest", b"not a folder".to_vec());
        let planner = DirectoryPlanner::new(session(store.clone(), true));
        let target = Node::from_remote_entry(&TreeNode::collection("dest"));
        let nodes = remote_dirs("src", &[""]);
        let pool = IndicatorPool::new(false, 1, 3);

        let result = planner.ensure_directories(&target, &nodes, &pool).await;
        assert!(matches!(result, Err(TransferError::TargetConflict { .. })));
    }

    #[tokio::test]
    async fn test_remote_dry_run_counts_without_creating() {
        let store = Arc::new(MemoryStore::new());
        let planner = DirectoryPlanner::new(session(store.clone(), true));
        let target = Node::from_remote_entry(&TreeNode::collection("dest/a"));
        let nodes = remote_dirs("src/a", &["", "sub"]);
        let pool = IndicatorPool::new(true, nodes.len() as u64, 3);

        planner.ensure_directories(&target, &nodes, &pool).await.unwrap();
        assert!(!store.is_dir("dest/a"));
        assert!(pool.aggregate().unwrap().is_complete());
        assert!(!store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::CreateDirectories(_))));
    }

    #[tokio::test]
    async fn test_remote_mkdir_failure() {
        let store = Arc::new(MemoryStore::new());
        store.fail_mkdir(true);
        let planner = DirectoryPlanner::new(session(store.clone(), false));
        let target = Node::from_remote_entry(&TreeNode::collection("dest"));
        let nodes = remote_dirs("src", &[""]);
        let pool = IndicatorPool::new(false, 1, 3);

        let result = planner.ensure_directories(&target, &nodes, &pool).await;
        assert!(matches!(result, Err(TransferError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_local_directories_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("out");
        let planner = DirectoryPlanner::new(session(Arc::new(MemoryStore::new()), false));
        let target = Node::new(NodePath::local(&root), true, chrono::Utc::now(), 0);
        let nodes = remote_dirs("src", &["a", "a/b", "c"]);
        let pool = IndicatorPool::new(true, 3, 3);

        planner.ensure_directories(&target, &nodes, &pool).await.unwrap();
        planner.ensure_directories(&target, &nodes, &pool).await.unwrap();

        assert!(root.join("a/b").is_dir());
        assert!(root.join("c").is_dir());
        assert!(pool.aggregate().unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_local_dry_run_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("out");
        let planner = DirectoryPlanner::new(session(Arc::new(MemoryStore::new()), true));
        let target = Node::new(NodePath::local(&root), true, chrono::Utc::now(), 0);
        let nodes = remote_dirs("src", &["a"]);
        let pool = IndicatorPool::new(true, 1, 3);

        planner.ensure_directories(&target, &nodes, &pool).await.unwrap();
        assert!(!root.exists());
        assert!(pool.aggregate().unwrap().is_complete());
    }
}
