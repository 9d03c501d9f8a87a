//! Tree entries on either side of a transfer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use treecp_core::api::normalize_path;
use treecp_core::{RemoteStore, TreeNode};

use crate::error::{Result, TransferError};

/// Prefix marking a command-line location as living on the remote store
pub const REMOTE_PREFIX: &str = "remote://";

/// Which backend a node lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Remote => write!(f, "remote"),
        }
    }
}

/// Path operations shared by both backends
pub trait TreePath: Sized {
    /// Append a `/`-separated relative path
    fn join(&self, relative: &str) -> Self;
    /// Last segment
    fn base(&self) -> String;
    /// Containing directory
    fn dir(&self) -> Self;
}

/// Absolute path on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalPath(PathBuf);

/// Canonical path on the remote store (no leading or trailing slash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath(String);

impl LocalPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl RemotePath {
    pub fn new(path: &str) -> Self {
        Self(normalize_path(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Segments of a relative path. A backslash separates segments only where
/// the platform uses it; on Unix it belongs to the file name.
fn segments(relative: &str) -> impl Iterator<Item = &str> {
    relative
        .split(|c: char| c == '/' || c == std::path::MAIN_SEPARATOR)
        .filter(|segment| !segment.is_empty() && *segment != ".")
}

impl TreePath for LocalPath {
    fn join(&self, relative: &str) -> Self {
        let mut path = self.0.clone();
        for segment in segments(relative) {
            path.push(segment);
        }
        Self(path)
    }

    fn base(&self) -> String {
        match self.0.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.0.to_string_lossy().into_owned(),
        }
    }

    fn dir(&self) -> Self {
        match self.0.parent() {
            Some(parent) => Self(parent.to_path_buf()),
            None => self.clone(),
        }
    }
}

impl TreePath for RemotePath {
    fn join(&self, relative: &str) -> Self {
        let joined = std::iter::once(self.0.as_str())
            .chain(segments(relative))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    fn base(&self) -> String {
        self.0.rsplit('/').next().unwrap_or_default().to_string()
    }

    fn dir(&self) -> Self {
        Self(treecp_core::api::parent_path(&self.0))
    }
}

/// A location on one of the two backends
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodePath {
    Local(LocalPath),
    Remote(RemotePath),
}

impl NodePath {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local(LocalPath::new(path))
    }

    pub fn remote(path: &str) -> Self {
        Self::Remote(RemotePath::new(path))
    }

    /// Parse a command-line location; `remote://a/b` names the store.
    pub fn parse(location: &str) -> Self {
        match location.strip_prefix(REMOTE_PREFIX) {
            Some(rest) => Self::remote(rest),
            None => Self::local(location),
        }
    }

    pub fn origin(&self) -> Origin {
        match self {
            Self::Local(_) => Origin::Local,
            Self::Remote(_) => Origin::Remote,
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path.as_path()),
            Self::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&str> {
        match self {
            Self::Remote(path) => Some(path.as_str()),
            Self::Local(_) => None,
        }
    }
}

impl TreePath for NodePath {
    fn join(&self, relative: &str) -> Self {
        match self {
            Self::Local(path) => Self::Local(path.join(relative)),
            Self::Remote(path) => Self::Remote(path.join(relative)),
        }
    }

    fn base(&self) -> String {
        match self {
            Self::Local(path) => path.base(),
            Self::Remote(path) => path.base(),
        }
    }

    fn dir(&self) -> Self {
        match self {
            Self::Local(path) => Self::Local(path.dir()),
            Self::Remote(path) => Self::Remote(path.dir()),
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.as_path().display()),
            Self::Remote(path) => write!(f, "{}{}", REMOTE_PREFIX, path.as_str()),
        }
    }
}

/// An entry of a source or destination tree.
///
/// Nodes are snapshots taken when the tree was crawled and never change
/// afterwards; deriving a variant builds a new node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    path: NodePath,
    is_dir: bool,
    relative_path: String,
    modified: DateTime<Utc>,
    size: u64,
    rename_to: Option<String>,
}

impl Node {
    pub(crate) fn new(path: NodePath, is_dir: bool, modified: DateTime<Utc>, size: u64) -> Self {
        Self {
            path,
            is_dir,
            relative_path: String::new(),
            modified,
            size,
            rename_to: None,
        }
    }

    /// Snapshot a local path. Relative paths are made absolute.
    pub async fn from_local_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute: PathBuf = std::path::absolute(path)
            .map_err(|e| TransferError::io(path, e))?
            .components()
            .collect();
        match tokio::fs::metadata(&absolute).await {
            Ok(metadata) => Ok(Self::from_local_metadata(absolute, &metadata)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(TransferError::io(absolute, e)),
        }
    }

    /// Snapshot a local entry from metadata already at hand
    pub fn from_local_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        let size = if metadata.is_dir() { 0 } else { metadata.len() };
        Self::new(NodePath::local(path), metadata.is_dir(), modified, size)
    }

    /// Stat a remote path through the store
    pub async fn from_remote_path(store: &dyn RemoteStore, path: &str) -> Result<Self> {
        match store
            .stat_node(path)
            .await
            .map_err(TransferError::store_unavailable)?
        {
            Some(entry) => Ok(Self::from_remote_entry(&entry)),
            None => Err(TransferError::NotFound(format!("{}{}", REMOTE_PREFIX, path))),
        }
    }

    /// Snapshot a remote entry. Unparseable size or mtime read as zero.
    pub fn from_remote_entry(entry: &TreeNode) -> Self {
        let size = entry.size.trim().parse::<u64>().unwrap_or(0);
        let modified = entry
            .mtime
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default();
        Self::new(
            NodePath::remote(&entry.path),
            entry.is_collection(),
            modified,
            size,
        )
    }

    /// Same entry, positioned relative to a crawl root
    pub fn with_relative_path(&self, relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            ..self.clone()
        }
    }

    pub(crate) fn with_rename(mut self, rename_to: Option<String>) -> Self {
        self.rename_to = rename_to;
        self
    }

    pub fn origin(&self) -> Origin {
        self.path.origin()
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Path below the crawl root, `/`-separated; empty for the root itself
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// New base name for a single-file copy, set on destination roots only
    pub fn rename_to(&self) -> Option<&str> {
        self.rename_to.as_deref()
    }

    pub fn base(&self) -> String {
        self.path.base()
    }

    pub fn join(&self, relative: &str) -> NodePath {
        self.path.join(relative)
    }

    pub fn dir(&self) -> NodePath {
        self.path.dir()
    }
}

/// Neutral `a/b` form of a local path below `root`
pub(crate) fn relative_between(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .filter_map(|component| match component {
                    Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}
