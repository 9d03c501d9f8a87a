//! Bounded-concurrency file transfer engine

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use treecp_core::{PutOptions, RemoteStore};

use crate::error::{Result, TransferError};
use crate::node::{Node, NodePath};
use crate::progress::{format_bytes, Indicator, IndicatorPool, ProgressReader};
use crate::session::{TransferOptions, TransferSession};

/// Copies the files of a crawl to their destination
pub struct TransferEngine {
    session: TransferSession,
}

impl TransferEngine {
    pub fn new(session: TransferSession) -> Self {
        Self { session }
    }

    /// Copy every file of `nodes` below `target`.
    ///
    /// At most `queue_size` copies run at once; submission waits for a free
    /// slot. Failures are collected and returned once every copy finished.
    pub async fn copy_all(&self, target: &Node, nodes: &[Node], pool: &IndicatorPool) -> Vec<TransferError> {
        let gate = Arc::new(Semaphore::new(self.session.queue_size()));
        let mut tasks = JoinSet::new();
        let mut errors = Vec::new();

        let files: Vec<&Node> = nodes.iter().filter(|node| !node.is_dir()).collect();
        info!(
            "Transferring {} files to {} ({} at a time)",
            files.len(),
            target.path(),
            self.session.queue_size()
        );

        for source in files {
            let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                break;
            };

            let empty = source.size() == 0;
            let indicator = pool.get(if empty { 1 } else { source.size() }, &source.base());
            let copy = FileCopy {
                store: Arc::clone(self.session.store()),
                options: self.session.options().clone(),
                source: source.clone(),
                target: target.clone(),
                indicator: indicator.clone(),
            };
            let pool = pool.clone();

            tasks.spawn(async move {
                let result = copy.run().await;
                if empty || copy.options.dry_run {
                    indicator.finish();
                }
                pool.retire(&indicator);
                pool.done();
                drop(permit);
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("{}", e);
                    errors.push(e);
                }
                Err(e) => {
                    warn!("Transfer task aborted: {}", e);
                    errors.push(TransferError::transfer_failed("<task>", e));
                }
            }
        }

        errors
    }
}

/// One file copy, owned by its task
struct FileCopy {
    store: Arc<dyn RemoteStore>,
    options: TransferOptions,
    source: Node,
    target: Node,
    indicator: Indicator,
}

impl FileCopy {
    /// Name of the file below the destination root
    fn destination(&self) -> NodePath {
        match self.target.rename_to() {
            Some(name) => self.target.join(name),
            None => self.target.join(self.source.relative_path()),
        }
    }

    async fn run(&self) -> Result<()> {
        let destination = self.destination();
        let label = self.source.path().to_string();
        let result = match (self.source.path(), &destination) {
            (NodePath::Local(source), NodePath::Remote(remote)) => {
                self.upload(source.as_path(), remote.as_str()).await
            }
            (NodePath::Remote(source), NodePath::Local(local)) => {
                self.download(source.as_str(), local.as_path()).await
            }
            _ => Err(TransferError::Unsupported(format!(
                "{} -> {}",
                self.source.path(),
                destination
            ))),
        };
        result.map_err(|e| e.for_file(label))
    }

    async fn upload(&self, source: &Path, destination: &str) -> Result<()> {
        if let Some(existing) = self.store.stat_node(destination).await? {
            if existing.is_collection() {
                return Err(TransferError::conflict(
                    destination,
                    "a folder already exists at the file's destination",
                ));
            }
        }

        if self.options.dry_run {
            info!("Would upload {} to {}", source.display(), destination);
            return Ok(());
        }

        if self.source.size() == 0 {
            debug!("Uploading empty file {}", destination);
            self.store
                .put_file(destination, Box::new(Cursor::new(Vec::new())), PutOptions::with_length(0))
                .await?;
            return Ok(());
        }

        let file = File::open(source)
            .await
            .map_err(|e| TransferError::io(source, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TransferError::io(source, e))?
            .len();

        if size < self.options.chunked_threshold {
            debug!("Uploading {} ({})", destination, format_bytes(size));
            let reader = ProgressReader::new(file, self.indicator.clone(), size);
            self.store
                .put_file(destination, Box::new(reader), PutOptions::with_length(size))
                .await?;
        } else {
            let compute_hash = size >= self.options.hash_threshold;
            debug!(
                "Uploading {} in chunks ({}, hash: {})",
                destination,
                format_bytes(size),
                compute_hash
            );
            let reader = ProgressReader::new(file, self.indicator.clone(), size).double(compute_hash);
            let (sink, listener) = self.indicator.error_sink();
            let uploaded = self
                .store
                .put_file_chunked(destination, Box::new(reader), compute_hash, sink)
                .await;
            if let Err(e) = listener.await {
                debug!("Error listener for {} ended abnormally: {}", destination, e);
            }
            uploaded?;
        }
        Ok(())
    }

    async fn download(&self, source: &str, destination: &Path) -> Result<()> {
        if let Ok(metadata) = tokio::fs::metadata(destination).await {
            if metadata.is_dir() {
                return Err(TransferError::conflict(
                    destination.display().to_string(),
                    "a folder already exists at the file's destination",
                ));
            }
        }

        if self.options.dry_run {
            info!("Would download {} to {}", source, destination.display());
            return Ok(());
        }

        let (stream, length) = self.store.get_file(source).await?;
        let mut reader = ProgressReader::new(stream, self.indicator.clone(), length);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(destination)
            .await
            .map_err(|e| TransferError::io(destination, e))?;

        let copied = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| TransferError::io(destination, e))?;
        file.flush()
            .await
            .map_err(|e| TransferError::io(destination, e))?;
        debug!("Downloaded {} ({})", destination.display(), format_bytes(copied));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;
    use tempfile::TempDir;
    use treecp_core::api::{StoreCall, CONTENT_HASH_KEY};
    use treecp_core::{MemoryStore, TreeNode};

    use crate::crawler::Crawler;

    fn session(store: Arc<MemoryStore>, options: TransferOptions) -> TransferSession {
        TransferSession::new(store, options)
    }

    async fn local_tree(files: &[(&str, &[u8])]) -> (TempDir, Node, Vec<Node>) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("src");
        std::fs::create_dir_all(&root).unwrap();
        for (name, data) in files {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
        let root = Node::from_local_path(&root).await.unwrap();
        let nodes = Crawler::new(Arc::new(MemoryStore::new()))
            .walk(&root, None)
            .await
            .unwrap();
        (temp_dir, root, nodes)
    }

    fn remote_target(path: &str) -> Node {
        Node::from_remote_entry(&TreeNode::collection(path))
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    #[tokio::test]
    async fn test_concurrency_is_bounded(#[case] queue_size: usize) {
        let files: Vec<(String, Vec<u8>)> = (0..8)
            .map(|i| (format!("f{}.txt", i), vec![b'x'; 16]))
            .collect();
        let refs: Vec<(&str, &[u8])> = files.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
        let (_temp, _root, nodes) = local_tree(&refs).await;

        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(20)));
        let options = TransferOptions {
            queue_size,
            ..TransferOptions::default()
        };
        let engine = TransferEngine::new(session(store.clone(), options));
        let pool = IndicatorPool::new(true, nodes.len() as u64, queue_size);

        let errors = engine.copy_all(&remote_target("dest"), &nodes, &pool).await;
        assert!(errors.is_empty());
        assert!(store.peak_concurrency() <= queue_size);
        assert!(store.peak_concurrency() >= 1);
        assert_eq!(store.files().len(), 8);
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let (_temp, _root, nodes) =
            local_tree(&[("a.txt", b"aaa"), ("b.txt", b"bbb"), ("c.txt", b"ccc")]).await;
        let store = Arc::new(MemoryStore::new());
        store.fail_path("dest/b.txt");
        let engine = TransferEngine::new(session(store.clone(), TransferOptions::default()));
        let pool = IndicatorPool::new(false, nodes.len() as u64, 3);

        let errors = engine.copy_all(&remote_target("dest"), &nodes, &pool).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], TransferError::TransferFailed { .. }));
        assert!(errors[0].path().unwrap().ends_with("b.txt"));
        assert_eq!(store.file("dest/a.txt").unwrap(), b"aaa");
        assert_eq!(store.file("dest/c.txt").unwrap(), b"ccc");
    }

    #[tokio::test]
    async fn test_upload_strategy_by_size() {
        let big = vec![7u8; 64];
        let huge = vec![9u8; 256];
        let (_temp, _root, nodes) =
            local_tree(&[("small.txt", b"tiny"), ("big.bin", &big), ("huge.bin", &huge)]).await;
        let store = Arc::new(MemoryStore::new());
        let options = TransferOptions {
            chunked_threshold: 32,
            hash_threshold: 128,
            ..TransferOptions::default()
        };
        let engine = TransferEngine::new(session(store.clone(), options));
        let pool = IndicatorPool::new(false, nodes.len() as u64, 3);

        let errors = engine.copy_all(&remote_target("dest"), &nodes, &pool).await;
        assert!(errors.is_empty());

        let calls = store.calls();
        assert!(calls.contains(&StoreCall::Put("dest/small.txt".to_string())));
        assert!(calls.contains(&StoreCall::PutChunked {
            path: "dest/big.bin".to_string(),
            compute_hash: false
        }));
        assert!(calls.contains(&StoreCall::PutChunked {
            path: "dest/huge.bin".to_string(),
            compute_hash: true
        }));
        assert_eq!(store.file("dest/huge.bin").unwrap(), huge);
        assert!(store
            .file_metadata("dest/huge.bin")
            .unwrap()
            .contains_key(CONTENT_HASH_KEY));

        assert_eq!(pool.finished(), 3);
        assert!(pool.messages().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_not_read() {
        let (_temp, _root, nodes) = local_tree(&[("empty.txt", b"")]).await;
        let store = Arc::new(MemoryStore::new());
        let engine = TransferEngine::new(session(store.clone(), TransferOptions::default()));
        let pool = IndicatorPool::new(false, nodes.len() as u64, 3);

        let errors = engine.copy_all(&remote_target("dest"), &nodes, &pool).await;
        assert!(errors.is_empty());
        assert_eq!(store.file("dest/empty.txt").unwrap(), Vec::<u8>::new());

        assert_eq!(pool.finished(), 1);
    }

    #[tokio::test]
    async fn test_folder_at_destination_conflicts() {
        let (_temp, _root, nodes) = local_tree(&[("a.txt", b"a")]).await;
        let store = Arc::new(MemoryStore::new());
        store.insert_dir("dest/a.txt");
        let engine = TransferEngine::new(session(store.clone(), TransferOptions::default()));
        let pool = IndicatorPool::new(false, nodes.len() as u64, 3);

        let errors = engine.copy_all(&remote_target("dest"), &nodes, &pool).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], TransferError::TargetConflict { .. }));
        assert!(!store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::Put(_))));
    }

    #[tokio::test]
    async fn test_chunked_upload_warnings_reach_indicator() {
        let (_temp, _root, nodes) = local_tree(&[("big.bin", &[1u8; 64])]).await;
        let store = Arc::new(MemoryStore::new());
        store.warn_on_chunked_upload("metadata rejected");
        let options = TransferOptions {
            chunked_threshold: 8,
            ..TransferOptions::default()
        };
        let engine = TransferEngine::new(session(store.clone(), options));
        let pool = IndicatorPool::new(false, nodes.len() as u64, 3);

        let errors = engine.copy_all(&remote_target("dest"), &nodes, &pool).await;
        assert!(errors.is_empty());
        let messages = pool.messages();
        assert_eq!(messages[0].0, "big.bin");
        assert!(messages[0].1.contains("metadata rejected"));
    }

    #[tokio::test]
    async fn test_download_and_rename() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_file("src/report.pdf", b"%PDF".to_vec());
        let crawler = Crawler::new(store.clone());
        let root = crawler.root(&NodePath::remote("src/report.pdf")).await.unwrap();
        let nodes = crawler.walk(&root, None).await.unwrap();

        let target = crate::target::resolve_target(
            &NodePath::local(temp_dir.path().join("renamed.pdf")),
            &root,
            true,
        );
        let engine = TransferEngine::new(session(store.clone(), TransferOptions::default()));
        let pool = IndicatorPool::new(false, 1, 3);

        let errors = engine.copy_all(&target, &nodes, &pool).await;
        assert!(errors.is_empty());
        assert_eq!(std::fs::read(temp_dir.path().join("renamed.pdf")).unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn test_download_missing_remote_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let node = Node::from_remote_entry(&TreeNode::leaf("src/gone.txt", 3, 0))
            .with_relative_path("gone.txt");
        let target = Node::new(NodePath::local(temp_dir.path()), true, chrono::Utc::now(), 0);
        let engine = TransferEngine::new(session(store, TransferOptions::default()));
        let pool = IndicatorPool::new(false, 1, 3);

        let errors = engine.copy_all(&target, &[node], &pool).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], TransferError::TransferFailed { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_untouched() {
        let (_temp, _root, nodes) = local_tree(&[("a.txt", b"a"), ("b.txt", b"b")]).await;
        let store = Arc::new(MemoryStore::new());
        let options = TransferOptions {
            dry_run: true,
            ..TransferOptions::default()
        };
        let engine = TransferEngine::new(session(store.clone(), options));
        let pool = IndicatorPool::new(true, 2, 3);

        let errors = engine.copy_all(&remote_target("dest"), &nodes, &pool).await;
        assert!(errors.is_empty());
        assert!(store.files().is_empty());
        assert!(pool.aggregate().unwrap().is_complete());
        assert_eq!(pool.finished(), 2);
    }
}
