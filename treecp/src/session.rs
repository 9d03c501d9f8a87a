//! Shared context of one transfer run

use std::sync::Arc;
use std::time::Duration;
use treecp_core::{RemoteStore, TransferSettings};

/// Options for a transfer run
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Maximum number of file copies in flight
    pub queue_size: usize,
    /// Log what would happen instead of touching either side
    pub dry_run: bool,
    /// Suppress progress rendering
    pub quiet: bool,
    /// Redraw interval of the progress display
    pub refresh_interval: Duration,
    /// Files at or above this size use the chunked upload
    pub chunked_threshold: u64,
    /// Chunked uploads at or above this size carry a content hash
    pub hash_threshold: u64,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from(&TransferSettings::default())
    }
}

impl From<&TransferSettings> for TransferOptions {
    fn from(settings: &TransferSettings) -> Self {
        Self {
            queue_size: settings.queue_size.max(1),
            dry_run: false,
            quiet: false,
            refresh_interval: Duration::from_millis(settings.refresh_interval_ms),
            chunked_threshold: settings.chunked_threshold,
            hash_threshold: settings.hash_threshold,
        }
    }
}

/// Store handle and options, passed to every stage of a transfer
#[derive(Clone)]
pub struct TransferSession {
    store: Arc<dyn RemoteStore>,
    options: TransferOptions,
}

impl TransferSession {
    pub fn new(store: Arc<dyn RemoteStore>, options: TransferOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    pub fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    pub fn queue_size(&self) -> usize {
        self.options.queue_size.max(1)
    }
}

impl std::fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("store", &self.store.describe())
            .field("options", &self.options)
            .finish()
    }
}
