//! In-process remote store.
//!
//! Keeps the whole tree in memory and records every call it receives. Paths
//! can be marked as failing, calls can be slowed down, and the number of
//! concurrently running transfers is tracked, which makes it the store of
//! choice for exercising the transfer engine.

use async_trait::async_trait;
use globset::Glob;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use super::{error::*, store::*, types::*};

/// A call received by the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Stat(String),
    List(String),
    CreateDirectories(Vec<String>),
    Put(String),
    PutChunked { path: String, compute_hash: bool },
    Get(String),
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    Directory,
    File {
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    },
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<String, MemoryEntry>,
    failing_paths: HashSet<String>,
    fail_listing: bool,
    fail_mkdir: bool,
    sink_warnings: Vec<String>,
    calls: Vec<StoreCall>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
    mtime: i64,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts one running transfer for as long as it is alive.
struct ActiveTransfer<'a> {
    store: &'a MemoryStore,
}

impl<'a> ActiveTransfer<'a> {
    fn start(store: &'a MemoryStore) -> Self {
        let now = store.active.fetch_add(1, Ordering::SeqCst) + 1;
        store.peak.fetch_max(now, Ordering::SeqCst);
        Self { store }
    }
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        self.store.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            latency: None,
            mtime: 1_700_000_000,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Delay every upload and download by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // Poisoning is ignored.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: StoreCall) {
        self.state().calls.push(call);
    }

    fn insert_parents(entries: &mut BTreeMap<String, MemoryEntry>, path: &str) {
        let mut current = String::new();
        let segments: Vec<&str> = path.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            entries
                .entry(current.clone())
                .or_insert(MemoryEntry::Directory);
        }
    }

    pub fn insert_dir(&self, path: &str) {
        let path = normalize_path(path);
        let mut state = self.state();
        Self::insert_parents(&mut state.entries, &path);
        state.entries.insert(path, MemoryEntry::Directory);
    }

    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let path = normalize_path(path);
        let mut state = self.state();
        Self::insert_parents(&mut state.entries, &path);
        state.entries.insert(
            path,
            MemoryEntry::File {
                data: data.into(),
                metadata: BTreeMap::new(),
            },
        );
    }

    /// Make every upload or download of `path` fail.
    pub fn fail_path(&self, path: &str) {
        self.state().failing_paths.insert(normalize_path(path));
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_listing = fail;
    }

    pub fn fail_mkdir(&self, fail: bool) {
        self.state().fail_mkdir = fail;
    }

    /// Report `message` through the error sink of every chunked upload.
    pub fn warn_on_chunked_upload(&self, message: impl Into<String>) {
        self.state().sink_warnings.push(message.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.state().entries.get(&normalize_path(path)) {
            Some(MemoryEntry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn file_metadata(&self, path: &str) -> Option<BTreeMap<String, String>> {
        match self.state().entries.get(&normalize_path(path)) {
            Some(MemoryEntry::File { metadata, .. }) => Some(metadata.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let path = normalize_path(path);
        path.is_empty() || matches!(self.state().entries.get(&path), Some(MemoryEntry::Directory))
    }

    /// All file paths currently stored.
    pub fn files(&self) -> Vec<String> {
        self.state()
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, MemoryEntry::File { .. }))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    /// Highest number of uploads and downloads seen running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn check_failing(&self, path: &str) -> Result<()> {
        if self.state().failing_paths.contains(path) {
            return Err(StoreError::Unavailable(format!("injected failure for {}", path)));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn to_tree_node(&self, path: &str, entry: &MemoryEntry) -> TreeNode {
        match entry {
            MemoryEntry::Directory => TreeNode::collection(path).with_mtime(self.mtime),
            MemoryEntry::File { data, metadata } => {
                let mut node = TreeNode::leaf(path, data.len() as u64, self.mtime);
                node.metadata = metadata.clone();
                node
            }
        }
    }

    fn store_file(&self, path: &str, data: Vec<u8>, metadata: BTreeMap<String, String>) -> Result<()> {
        let mut state = self.state();
        if matches!(state.entries.get(path), Some(MemoryEntry::Directory)) {
            return Err(StoreError::conflict(path, "a folder already exists at this path"));
        }
        Self::insert_parents(&mut state.entries, path);
        state
            .entries
            .insert(path.to_string(), MemoryEntry::File { data, metadata });
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn describe(&self) -> String {
        "in-memory store".to_string()
    }

    async fn stat_node(&self, path: &str) -> Result<Option<TreeNode>> {
        let path = normalize_path(path);
        self.record(StoreCall::Stat(path.clone()));
        if path.is_empty() {
            return Ok(Some(TreeNode::collection("")));
        }
        let state = self.state();
        Ok(state
            .entries
            .get(&path)
            .map(|entry| self.to_tree_node(&path, entry)))
    }

    async fn list_children(&self, pattern: &str) -> Result<Vec<TreeNode>> {
        self.record(StoreCall::List(pattern.to_string()));
        let (dir, glob) = split_pattern(pattern);
        let matcher = Glob::new(&glob)
            .map_err(|e| StoreError::Pattern(format!("{}: {}", pattern, e)))?
            .compile_matcher();

        let state = self.state();
        if state.fail_listing {
            return Err(StoreError::Unavailable("injected listing failure".to_string()));
        }
        if !dir.is_empty() && !matches!(state.entries.get(&dir), Some(MemoryEntry::Directory)) {
            return Err(StoreError::NotFound(dir));
        }

        Ok(state
            .entries
            .iter()
            .filter(|(path, _)| parent_path(path) == dir)
            .map(|(path, entry)| self.to_tree_node(path, entry))
            .filter(|node| matcher.is_match(node.name()))
            .collect())
    }

    async fn create_directories(&self, paths: &[String]) -> Result<()> {
        let canonical: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
        self.record(StoreCall::CreateDirectories(canonical.clone()));

        let mut state = self.state();
        if state.fail_mkdir {
            return Err(StoreError::Unavailable("injected mkdir failure".to_string()));
        }
        for path in canonical {
            if matches!(state.entries.get(&path), Some(MemoryEntry::File { .. })) {
                return Err(StoreError::conflict(path, "a file already exists at this path"));
            }
            Self::insert_parents(&mut state.entries, &path);
            state.entries.insert(path, MemoryEntry::Directory);
        }
        Ok(())
    }

    async fn put_file(&self, path: &str, mut stream: BoxUpload, options: PutOptions) -> Result<()> {
        let path = normalize_path(path);
        self.record(StoreCall::Put(path.clone()));
        let _active = ActiveTransfer::start(self);
        self.simulate_latency().await;
        self.check_failing(&path)?;

        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        if let Some(expected) = options.content_length {
            if data.len() as u64 != expected {
                return Err(StoreError::upload(
                    path,
                    format!("expected {} bytes, received {}", expected, data.len()),
                ));
            }
        }
        self.store_file(&path, data, options.metadata)
    }

    async fn put_file_chunked(
        &self,
        path: &str,
        mut stream: BoxUpload,
        compute_hash: bool,
        errors: ErrorSink,
    ) -> Result<()> {
        let path = normalize_path(path);
        self.record(StoreCall::PutChunked {
            path: path.clone(),
            compute_hash,
        });
        let _active = ActiveTransfer::start(self);
        self.simulate_latency().await;
        self.check_failing(&path)?;

        let mut metadata = BTreeMap::new();
        if compute_hash {
            metadata.insert(CONTENT_HASH_KEY.to_string(), hash_stream(&mut stream).await?);
        }
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;

        let warnings = self.state().sink_warnings.clone();
        for warning in warnings {
            let _ = errors.send(StoreError::upload(path.as_str(), warning));
        }
        self.store_file(&path, data, metadata)
    }

    async fn get_file(&self, path: &str) -> Result<(BoxDownload, u64)> {
        let path = normalize_path(path);
        self.record(StoreCall::Get(path.clone()));
        let _active = ActiveTransfer::start(self);
        self.simulate_latency().await;
        self.check_failing(&path)?;

        match self.state().entries.get(&path) {
            Some(MemoryEntry::File { data, .. }) => {
                let length = data.len() as u64;
                Ok((Box::new(Cursor::new(data.clone())), length))
            }
            Some(MemoryEntry::Directory) => {
                Err(StoreError::conflict(path, "cannot download a folder"))
            }
            None => Err(StoreError::NotFound(path)),
        }
    }
}
