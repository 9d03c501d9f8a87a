//! Core store library
//!
//! This crate provides the remote side of treecp: the interface every remote
//! tree store adapter implements, the bundled adapters, and the profile
//! configuration that selects which store a transfer talks to.

pub mod api;
pub mod config;

pub use api::{
    DirectoryStore, MemoryStore, NodeType, PutOptions, RemoteStore, StoreError, TreeNode,
};
pub use config::{Profile, ProfileList, StoreSettings, TransferSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_default_transfer_settings() {
        let profile = Profile::directory("/srv/store");
        assert_eq!(profile.transfer.queue_size, 3);
        assert_eq!(profile.transfer.refresh_interval_ms, 100);
    }

    #[tokio::test]
    async fn test_open_directory_store() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = Profile::directory(temp_dir.path()).store.open();
        assert!(store.describe().contains("directory store"));
        assert!(store.stat_node("/").await.unwrap().unwrap().is_collection());
    }
}
