use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::mpsc;

use super::{error::*, types::*};

/// Buffer size used when a store has to scan a stream itself.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// A seekable byte source handed to the upload primitives.
pub trait UploadStream: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> UploadStream for T {}

pub type BoxUpload = Box<dyn UploadStream>;

pub type BoxDownload = Box<dyn AsyncRead + Send + Unpin>;

/// Sink for errors that a chunked upload reports without failing the call.
pub type ErrorSink = mpsc::UnboundedSender<StoreError>;

/// Primitives of a hierarchical remote tree store.
///
/// Paths are forward-slash separated; leading and trailing slashes are
/// ignored by implementations.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short human readable description, used by `info`.
    fn describe(&self) -> String;

    /// Metadata of the node at `path`, `None` when nothing exists there.
    async fn stat_node(&self, path: &str) -> Result<Option<TreeNode>>;

    /// Immediate children of a directory matching a glob suffix (`dir/*`).
    async fn list_children(&self, pattern: &str) -> Result<Vec<TreeNode>>;

    /// Create all given directories in one batch. Existing directories are
    /// left untouched.
    async fn create_directories(&self, paths: &[String]) -> Result<()>;

    /// Single-shot upload of a whole stream.
    async fn put_file(&self, path: &str, stream: BoxUpload, options: PutOptions) -> Result<()>;

    /// Streaming upload for large files. When `compute_hash` is set the
    /// store hashes the content and attaches it under [`CONTENT_HASH_KEY`].
    async fn put_file_chunked(
        &self,
        path: &str,
        stream: BoxUpload,
        compute_hash: bool,
        errors: ErrorSink,
    ) -> Result<()>;

    /// Open a node for reading, with its length in bytes.
    async fn get_file(&self, path: &str) -> Result<(BoxDownload, u64)>;
}

/// Hash a whole upload stream, then rewind it so the upload can start over.
pub async fn hash_stream(stream: &mut BoxUpload) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = stream.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    stream.seek(SeekFrom::Start(0)).await?;
    Ok(format!("{:x}", hasher.finalize()))
}
