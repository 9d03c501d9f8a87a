//! Remote store backed by a directory tree, e.g. a mounted share.

use async_trait::async_trait;
use globset::Glob;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::{error::*, store::*, types::*};

/// Size of one part of a chunked upload.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Suffix of the sidecar files holding node metadata.
const META_SUFFIX: &str = ".treecp-meta";

pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a remote path onto the backing directory, refusing to escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let canonical = normalize_path(path);
        let mut resolved = self.root.clone();
        for component in Path::new(&canonical).components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                _ => return Err(StoreError::InvalidPath(path.to_string())),
            }
        }
        Ok(resolved)
    }

    fn meta_path(local: &Path) -> PathBuf {
        let mut name = local.file_name().unwrap_or_default().to_os_string();
        name.push(META_SUFFIX);
        local.with_file_name(name)
    }

    async fn read_metadata(local: &Path) -> BTreeMap<String, String> {
        match fs::read(Self::meta_path(local)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        }
    }

    async fn to_tree_node(remote: String, local: &Path, metadata: &std::fs::Metadata) -> TreeNode {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if metadata.is_dir() {
            TreeNode::collection(remote).with_mtime(mtime)
        } else {
            let mut node = TreeNode::leaf(remote, metadata.len(), mtime);
            node.metadata = Self::read_metadata(local).await;
            node
        }
    }

    /// Open the destination of an upload, creating missing parents.
    async fn create_target(&self, path: &str) -> Result<(PathBuf, File)> {
        let local = self.resolve(path)?;
        if fs::metadata(&local).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(StoreError::conflict(path, "a folder already exists at this path"));
        }
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&local).await?;
        Ok((local, file))
    }
}

#[async_trait]
impl RemoteStore for DirectoryStore {
    fn describe(&self) -> String {
        format!("directory store at {}", self.root.display())
    }

    async fn stat_node(&self, path: &str) -> Result<Option<TreeNode>> {
        let local = self.resolve(path)?;
        match fs::metadata(&local).await {
            Ok(metadata) => Ok(Some(
                Self::to_tree_node(normalize_path(path), &local, &metadata).await,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_children(&self, pattern: &str) -> Result<Vec<TreeNode>> {
        let (dir, glob) = split_pattern(pattern);
        let matcher = Glob::new(&glob)
            .map_err(|e| StoreError::Pattern(format!("{}: {}", pattern, e)))?
            .compile_matcher();

        let local_dir = self.resolve(&dir)?;
        let mut entries = match fs::read_dir(&local_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(dir));
            }
            Err(e) => return Err(e.into()),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(META_SUFFIX) || !matcher.is_match(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            let remote = if dir.is_empty() {
                name
            } else {
                format!("{}/{}", dir, name)
            };
            children.push(Self::to_tree_node(remote, &entry.path(), &metadata).await);
        }

        children.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Listed {} children for {}", children.len(), pattern);
        Ok(children)
    }

    async fn create_directories(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            let local = self.resolve(path)?;
            match fs::metadata(&local).await {
                Ok(metadata) if metadata.is_dir() => continue,
                Ok(_) => {
                    return Err(StoreError::conflict(path.as_str(), "a file already exists at this path"));
                }
                Err(_) => fs::create_dir_all(&local).await?,
            }
        }
        debug!("Created {} directories", paths.len());
        Ok(())
    }

    async fn put_file(&self, path: &str, mut stream: BoxUpload, options: PutOptions) -> Result<()> {
        let (local, mut file) = self.create_target(path).await?;
        let written = tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;

        if let Some(expected) = options.content_length {
            if written != expected {
                return Err(StoreError::upload(
                    path,
                    format!("expected {} bytes, received {}", expected, written),
                ));
            }
        }

        if !options.metadata.is_empty() {
            fs::write(Self::meta_path(&local), serde_json::to_vec(&options.metadata)?).await?;
        }
        Ok(())
    }

    async fn put_file_chunked(
        &self,
        path: &str,
        mut stream: BoxUpload,
        compute_hash: bool,
        errors: ErrorSink,
    ) -> Result<()> {
        let hash = if compute_hash {
            Some(hash_stream(&mut stream).await?)
        } else {
            None
        };

        let (local, mut file) = self.create_target(path).await?;
        let mut buffer = vec![0; PART_SIZE];
        let mut part = 0usize;

        loop {
            // Fill one part, the last one may be short.
            let mut filled = 0;
            while filled < PART_SIZE {
                let bytes_read = stream.read(&mut buffer[filled..]).await?;
                if bytes_read == 0 {
                    break;
                }
                filled += bytes_read;
            }
            if filled == 0 {
                break;
            }
            file.write_all(&buffer[..filled]).await?;
            part += 1;
            debug!("Uploaded part {} of {} ({} bytes)", part, path, filled);
            if filled < PART_SIZE {
                break;
            }
        }
        file.flush().await?;

        if let Some(hash) = hash {
            let metadata = BTreeMap::from([(CONTENT_HASH_KEY.to_string(), hash)]);
            let persisted = match serde_json::to_vec(&metadata) {
                Ok(bytes) => fs::write(Self::meta_path(&local), bytes)
                    .await
                    .map_err(StoreError::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = persisted {
                warn!("Could not persist content hash of {}: {}", path, e);
                let _ = errors.send(e);
            }
        }
        Ok(())
    }

    async fn get_file(&self, path: &str) -> Result<(BoxDownload, u64)> {
        let local = self.resolve(path)?;
        let file = match File::open(&local).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(StoreError::conflict(path, "cannot download a folder"));
        }
        Ok((Box::new(file), metadata.len()))
    }
}
