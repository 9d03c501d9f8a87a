//! Profile configuration
//!
//! Profiles are stored in a TOML file holding any number of labelled
//! profiles and the label of the active one. Each profile describes the
//! remote store to talk to and how transfers against it are tuned.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::api::{DirectoryStore, RemoteStore};

/// Environment variable overriding the store root of the active profile.
pub const STORE_ROOT_ENV: &str = "TREECP_STORE_ROOT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("This label is already used: [{0}]")]
    LabelInUse(String),

    #[error("Config not found, this label is not valid [{0}]")]
    UnknownLabel(String),

    #[error("No active profile, add one with `treecp config add`")]
    NoActiveProfile,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// All known profiles and the active one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileList {
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub store: StoreSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreSettings {
    /// A directory exposed as the remote tree
    Directory { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_chunked_threshold")]
    pub chunked_threshold: u64,
    #[serde(default = "default_hash_threshold")]
    pub hash_threshold: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            refresh_interval_ms: default_refresh_interval_ms(),
            chunked_threshold: default_chunked_threshold(),
            hash_threshold: default_hash_threshold(),
        }
    }
}

impl StoreSettings {
    /// Build the store adapter described by these settings
    pub fn open(&self) -> Arc<dyn RemoteStore> {
        match self {
            StoreSettings::Directory { root } => Arc::new(DirectoryStore::new(root.clone())),
        }
    }
}

impl Profile {
    pub fn directory(root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreSettings::Directory { root: root.into() },
            transfer: TransferSettings::default(),
        }
    }

    /// Profile described by the environment, if any.
    pub fn from_env() -> Option<Self> {
        Self::from_store_root(std::env::var(STORE_ROOT_ENV).ok())
    }

    fn from_store_root(root: Option<String>) -> Option<Self> {
        root.filter(|r| !r.trim().is_empty()).map(Self::directory)
    }
}

impl ProfileList {
    /// Load the list, a missing file yields an empty list.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, starting empty", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(toml::from_str(&content)?)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Delete the config file with every profile in it.
    ///
    /// Returns whether a file was removed.
    pub async fn clear<P: AsRef<Path>>(path: P) -> Result<bool> {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Removed config file {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Add a profile and make it the active one
    pub fn add(&mut self, label: impl Into<String>, profile: Profile) -> Result<()> {
        let label = label.into();
        if self.profiles.contains_key(&label) {
            return Err(ConfigError::LabelInUse(label));
        }
        self.profiles.insert(label.clone(), profile);
        self.active = Some(label);
        Ok(())
    }

    /// Remove a profile; removing the active one leaves no active profile.
    pub fn remove(&mut self, label: &str) -> Result<Profile> {
        let profile = self
            .profiles
            .remove(label)
            .ok_or_else(|| ConfigError::UnknownLabel(label.to_string()))?;
        if self.active.as_deref() == Some(label) {
            self.active = None;
        }
        Ok(profile)
    }

    pub fn set_active(&mut self, label: &str) -> Result<()> {
        if !self.profiles.contains_key(label) {
            return Err(ConfigError::UnknownLabel(label.to_string()));
        }
        self.active = Some(label.to_string());
        Ok(())
    }

    pub fn active_profile(&self) -> Option<(&str, &Profile)> {
        let label = self.active.as_deref()?;
        self.profiles.get(label).map(|p| (label, p))
    }

    /// Profile to use for this run: environment first, then the active profile.
    pub fn resolve(&self) -> Result<Profile> {
        let from_file = self.active_profile().map(|(_, p)| p.clone());
        match (Profile::from_env(), from_file) {
            (Some(mut env), Some(file)) => {
                env.transfer = file.transfer;
                Ok(env)
            }
            (Some(env), None) => Ok(env),
            (None, Some(file)) => Ok(file),
            (None, None) => Err(ConfigError::NoActiveProfile),
        }
    }
}

/// Default location of the profile file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("treecp")
        .join("config.toml")
}

// Default value functions
fn default_queue_size() -> usize { 3 }
fn default_refresh_interval_ms() -> u64 { 100 }
fn default_chunked_threshold() -> u64 { 100 * 1024 * 1024 }
fn default_hash_threshold() -> u64 { 5 * 1024 * 1024 * 1024 }
