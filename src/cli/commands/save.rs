//! Save command - snapshot the builder and upload it

use super::{connect_driver, require_cache_key, resolve_builder, resolve_remote};
use crate::cli::args::{clean_list, SaveArgs};
use crate::config::Config;
use crate::driver::RecordType;
use crate::error::BkStateResult;
use crate::remote::create_backend;
use crate::state::create_state_store;
use crate::transfer::{save_to_remote, should_skip_save, CompressionLevel, SaveOptions};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

/// Execute the save command
pub async fn execute(
    args: SaveArgs,
    config: &Config,
    state_file: Option<PathBuf>,
) -> BkStateResult<()> {
    let ctx = UiContext::detect();

    let target_types = if args.target_types.is_empty() {
        RecordType::parse_list(&config.transfer.target_types)?
    } else {
        RecordType::parse_list(&clean_list(&args.target_types))?
    };
    let opts = SaveOptions {
        primary_key: require_cache_key(args.cache_key)?,
        target_types,
        compression_level: CompressionLevel::new(
            args.compression_level
                .unwrap_or(config.transfer.compression_level),
        )?,
    };
    let rewrite = args.rewrite_cache.unwrap_or(config.transfer.rewrite_cache);
    let target = resolve_builder(&args.builder, &config.builder)?;
    let remote = resolve_remote(&args.remote, &config.remote)?;

    let state = create_state_store(state_file);
    if should_skip_save(state.as_ref(), &opts.primary_key, rewrite).await? {
        ui::step_info(&ctx, "Cache key matched. Ignore cache saving.");
        return Ok(());
    }

    let backend = create_backend(&remote).await?;
    let driver = connect_driver(&target).await?;
    save_to_remote(&driver, backend.as_ref(), &opts).await?;

    ui::step_ok(&ctx, &format!("Saved builder state as {}", opts.primary_key));
    Ok(())
}
