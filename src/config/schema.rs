//! Configuration schema for buildkit-state
//!
//! Configuration is stored at `~/.config/buildkit-state/config.toml`. Every
//! value can be overridden by a command-line flag or an action input.

use crate::driver::RecordType;
use crate::remote::RemoteKind;
use crate::transfer::CompressionLevel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Which builder to operate on
    pub builder: BuilderConfig,

    /// Where snapshots are stored
    pub remote: RemoteConfig,

    /// Snapshot contents and compression
    pub transfer: TransferConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Builder selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// buildx builder name
    pub name: Option<String>,

    /// Container name, when it does not follow the buildx naming scheme
    pub container: Option<String>,

    /// Docker endpoint (`unix://`, `tcp://` or `http://`)
    pub docker_endpoint: Option<String>,
}

/// Remote storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Backend kind: "gha", "s3" or "local"
    pub kind: RemoteKind,

    pub s3: S3Config,

    pub local: LocalConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: Option<String>,
    pub key_prefix: String,
    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub path: Option<PathBuf>,
}

/// Snapshot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// zstd level used when saving
    pub compression_level: i32,

    /// Record types kept in a saved snapshot
    pub target_types: Vec<String>,

    /// Start the builder again after loading
    pub resume_builder: bool,

    /// Save even when the restored key equals the primary key
    pub rewrite_cache: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            compression_level: CompressionLevel::DEFAULT,
            target_types: vec![
                RecordType::CacheMount.to_string(),
                RecordType::Frontend.to_string(),
            ],
            resume_builder: true,
            rewrite_cache: false,
        }
    }
}
