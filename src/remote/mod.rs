//! Remote snapshot storage
//!
//! Three interchangeable backends share one contract:
//! - `s3`: any S3-compatible object store
//! - `actions`: the GitHub Actions cache service
//! - `local`: a directory on the local filesystem

pub mod actions;
mod factory;
pub mod local;
pub mod matcher;
pub mod s3;

pub use factory::{create_backend, RemoteKind, RemoteSettings};

use crate::driver::ByteStream;
use crate::error::BkStateResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// Namespace every stored key lives under
pub const NAMESPACE_VERSION: &str = "v1";

/// A resolved snapshot, ready to be streamed
pub struct LoadedCache {
    /// Key as the caller would pass it to `save`
    pub key: String,
    /// Compressed snapshot; dropping it releases the backend handle
    pub data: ByteStream,
    /// Backend-specific details, informational only
    pub extra: HashMap<String, serde_json::Value>,
}

impl fmt::Debug for LoadedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedCache")
            .field("key", &self.key)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Storage for compressed snapshots
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Find the best snapshot for `primary`, falling back to `secondary` prefixes.
    ///
    /// An exact match on any key wins; otherwise the newest prefix match.
    /// Nothing matching is `Ok(None)`, not an error.
    async fn load(&self, primary: &str, secondary: &[String])
        -> BkStateResult<Option<LoadedCache>>;

    /// Store a full snapshot under `key` in one write
    async fn save(&self, key: &str, data: Bytes) -> BkStateResult<()>;
}

/// `[primary] + secondary`, order preserved
pub fn combined_keys(primary: &str, secondary: &[String]) -> Vec<String> {
    std::iter::once(primary.to_string())
        .chain(secondary.iter().cloned())
        .collect()
}
