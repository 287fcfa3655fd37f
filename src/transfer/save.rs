//! Snapshot the builder state and upload it

use crate::driver::usage::format_size;
use crate::driver::{Driver, RecordType};
use crate::error::BkStateResult;
use crate::remote::RemoteBackend;
use crate::state::{StateStore, LOADED_CACHE_KEY};
use crate::transfer::codec::{self, CompressionLevel};
use crate::ui;
use tracing::{debug, info};

/// Inputs of the save path
#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub primary_key: String,
    /// Record types kept in the snapshot; everything else is pruned
    pub target_types: Vec<RecordType>,
    pub compression_level: CompressionLevel,
}

/// Whether the key restored earlier in this build already holds the state.
///
/// `rewrite` forces a save even when the keys match.
pub async fn should_skip_save(
    state: &dyn StateStore,
    primary_key: &str,
    rewrite: bool,
) -> BkStateResult<bool> {
    let restored = state.load(LOADED_CACHE_KEY).await?;
    if restored.as_deref() != Some(primary_key) {
        return Ok(false);
    }
    if rewrite {
        info!("Cache key matched, rewriting anyway");
        return Ok(false);
    }
    debug!(key = primary_key, "restored key equals primary key");
    Ok(true)
}

/// Prune, stop, compress and upload the builder state
pub async fn save_to_remote(
    driver: &dyn Driver,
    backend: &dyn RemoteBackend,
    opts: &SaveOptions,
) -> BkStateResult<()> {
    {
        let _group = ui::group("Remove unwanted caches");
        driver.prune_except(&opts.target_types).await?;
        ui::print_report(&driver.print_disk_usage().await?);
    }

    let _group = ui::group("Save buildkit state to remote");
    info!("Stopping buildkitd");
    driver.stop().await?;

    let snapshot = codec::compress_state(driver, opts.compression_level).await?;
    info!(
        "Uploading {} snapshot as {}",
        format_size(i64::try_from(snapshot.len()).unwrap_or(i64::MAX)),
        opts.primary_key
    );
    backend.save(&opts.primary_key, snapshot).await
}
