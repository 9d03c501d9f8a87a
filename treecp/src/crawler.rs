//! Source tree enumeration using walkdir for local trees and bulk listings
//! for remote ones

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};
use treecp_core::RemoteStore;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, TransferError};
use crate::node::{relative_between, LocalPath, Node, NodePath, RemotePath, TreePath};

/// Walks a source tree into a flat list of nodes
pub struct Crawler {
    store: Arc<dyn RemoteStore>,
}

impl Crawler {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Snapshot the root of a source location
    pub async fn root(&self, location: &NodePath) -> Result<Node> {
        match location {
            NodePath::Local(path) => Node::from_local_path(path.as_path()).await,
            NodePath::Remote(path) => Node::from_remote_path(self.store.as_ref(), path.as_str()).await,
        }
    }

    /// Enumerate `root` and everything below it.
    ///
    /// A file root yields itself, named by its base name. A local directory
    /// yields itself first (empty relative path) followed by its descendants;
    /// a remote directory yields only its descendants, parents before
    /// children.
    pub async fn walk(&self, root: &Node, continuation: Option<&str>) -> Result<Vec<Node>> {
        if !root.is_dir() {
            return Ok(vec![root.with_relative_path(root.base())]);
        }

        let continuation = continuation.unwrap_or_default();
        let nodes = match root.path() {
            NodePath::Local(path) => self.walk_local(path.as_path(), continuation)?,
            NodePath::Remote(path) => self.walk_remote(path.as_str(), continuation).await?,
        };

        info!(
            "Crawled {} entries under {}",
            nodes.len(),
            root.join(continuation)
        );
        Ok(nodes)
    }

    fn walk_local(&self, root: &Path, continuation: &str) -> Result<Vec<Node>> {
        let start = LocalPath::new(root).join(continuation);
        let walker = WalkDir::new(start.as_path())
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        let mut nodes = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| start.as_path().to_path_buf());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
                TransferError::io(path, source)
            })?;
            let metadata = entry
                .metadata()
                .map_err(|e| TransferError::io(entry.path(), e.into()))?;

            let relative = relative_between(root, entry.path());
            debug!("Found local {}: {}", kind(metadata.is_dir()), relative);
            nodes.push(Node::from_local_metadata(entry.path(), &metadata).with_relative_path(relative));
        }
        Ok(nodes)
    }

    fn walk_remote<'a>(
        &'a self,
        root: &'a str,
        continuation: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Node>>> + Send + 'a>> {
        Box::pin(async move {
            let pattern = RemotePath::new(root).join(continuation).join("*");
            let entries = self
                .store
                .list_children(pattern.as_str())
                .await
                .map_err(TransferError::store_unavailable)?;

            let mut nodes = Vec::new();
            for entry in entries {
                let node = Node::from_remote_entry(&entry);
                let relative = remote_relative(root, &node);
                debug!("Found remote {}: {}", kind(node.is_dir()), relative);

                let node = node.with_relative_path(relative.clone());
                let is_dir = node.is_dir();
                nodes.push(node);
                if is_dir {
                    nodes.extend(self.walk_remote(root, &relative).await?);
                }
            }
            Ok(nodes)
        })
    }
}

/// Path of a remote node below the crawl root
fn remote_relative(root: &str, node: &Node) -> String {
    let full = node.path().as_remote().unwrap_or_default();
    let root = RemotePath::new(root);
    if root.as_str().is_empty() {
        return full.to_string();
    }
    full.strip_prefix(root.as_str())
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(full)
        .to_string()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn kind(is_dir: bool) -> &'static str {
    if is_dir {
        "directory"
    } else {
        "file"
    }
}
