//! Local directory backend
//!
//! Snapshots live at `<root>/v1/<key>`. Useful for self-hosted runners with a
//! persistent disk and for trying the tool without any cloud account.

use crate::driver::ByteStream;
use crate::error::{BkStateError, BkStateResult};
use crate::remote::matcher::{Candidate, KeyMatcher, Selection};
use crate::remote::{combined_keys, LoadedCache, RemoteBackend, NAMESPACE_VERSION};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use walkdir::WalkDir;

/// In-progress writes, invisible to lookups
const STAGING_DIR: &str = ".staging";

/// Snapshot storage in a local directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn namespace(&self) -> PathBuf {
        self.root.join(NAMESPACE_VERSION)
    }

    /// Path a key is stored at; keys may not climb out of the namespace
    pub fn entry_path(&self, key: &str) -> BkStateResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(BkStateError::InvalidInput {
                name: "cache-key",
                value: key.to_string(),
                reason: "must not contain `..` path components".into(),
            });
        }
        Ok(self.namespace().join(relative))
    }
}

/// Stored entries in file-name order, named by their path relative to
/// `namespace`. Entries are produced lazily as the walk proceeds.
fn walk(namespace: &Path) -> impl Iterator<Item = BkStateResult<Candidate<PathBuf>>> + '_ {
    WalkDir::new(namespace)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || e.file_name() != STAGING_DIR)
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(namespace).display().to_string();
                    return Some(Err(BkStateError::io(format!("scanning {path}"), e.into())));
                }
            };
            if !entry.file_type().is_file() {
                return None;
            }
            let relative = entry.path().strip_prefix(namespace).ok()?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            Some(Ok(Candidate {
                name,
                modified,
                item: entry.into_path(),
            }))
        })
}

/// Best match among `entries`, stopping at the first exact hit
fn select<T>(
    matcher: &KeyMatcher,
    entries: impl IntoIterator<Item = BkStateResult<Candidate<T>>>,
) -> BkStateResult<Option<Candidate<T>>> {
    let mut selection = Selection::default();
    let mut seen = 0usize;
    for entry in entries {
        seen += 1;
        if selection.offer(matcher, entry?) {
            break;
        }
    }
    debug!(entries = seen, exact = selection.is_exact(), "scanned local cache");
    Ok(selection.into_inner())
}

fn find(namespace: &Path, matcher: &KeyMatcher) -> BkStateResult<Option<Candidate<PathBuf>>> {
    if !namespace.exists() {
        return Ok(None);
    }
    select(matcher, walk(namespace))
}

#[async_trait]
impl RemoteBackend for LocalBackend {
    async fn load(
        &self,
        primary: &str,
        secondary: &[String],
    ) -> BkStateResult<Option<LoadedCache>> {
        let namespace = self.namespace();
        let matcher = KeyMatcher::new(combined_keys(primary, secondary));
        let found = tokio::task::spawn_blocking(move || find(&namespace, &matcher))
            .await
            .map_err(|e| BkStateError::Internal(format!("directory scan failed: {e}")))??;
        let Some(found) = found else {
            debug!(root = %self.root.display(), "no local snapshot matched");
            return Ok(None);
        };

        let file = tokio::fs::File::open(&found.item)
            .await
            .map_err(|e| BkStateError::io(format!("opening {}", found.item.display()), e))?;
        let mut extra = HashMap::new();
        extra.insert(
            "path".to_string(),
            found.item.display().to_string().into(),
        );
        if let Some(modified) = found.modified {
            extra.insert("modified".to_string(), modified.to_rfc3339().into());
        }

        let data: ByteStream = ReaderStream::new(file).boxed();
        Ok(Some(LoadedCache {
            key: found.name,
            data,
            extra,
        }))
    }

    async fn save(&self, key: &str, data: Bytes) -> BkStateResult<()> {
        let target = self.entry_path(key)?;
        let staging = self.namespace().join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| BkStateError::io(format!("creating {}", staging.display()), e))?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BkStateError::io(format!("creating {}", parent.display()), e))?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let temp = staging.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::write(&temp, &data)
            .await
            .map_err(|e| BkStateError::io(format!("writing {}", temp.display()), e))?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(BkStateError::io(format!("moving snapshot to {}", target.display()), e));
        }

        info!(path = %target.display(), size = data.len(), "snapshot stored");
        Ok(())
    }
}
