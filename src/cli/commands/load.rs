//! Load command - restore a snapshot into the builder

use super::{connect_driver, require_cache_key, resolve_builder, resolve_remote};
use crate::cli::args::{clean_list, LoadArgs};
use crate::config::Config;
use crate::error::BkStateResult;
use crate::remote::create_backend;
use crate::state::create_state_store;
use crate::transfer::{load_from_remote, LoadOptions};
use crate::ui::{self, UiContext, WorkflowOutputs};
use std::path::PathBuf;

/// Execute the load command
pub async fn execute(
    args: LoadArgs,
    config: &Config,
    state_file: Option<PathBuf>,
) -> BkStateResult<()> {
    let ctx = UiContext::detect();

    let opts = LoadOptions {
        primary_key: require_cache_key(args.cache_key)?,
        restore_keys: clean_list(&args.cache_restore_keys),
        resume_builder: args
            .resume_builder
            .unwrap_or(config.transfer.resume_builder),
    };
    let target = resolve_builder(&args.builder, &config.builder)?;
    let remote = resolve_remote(&args.remote, &config.remote)?;

    let backend = create_backend(&remote).await?;
    let state = create_state_store(state_file);
    let outputs = WorkflowOutputs::from_env();
    let mut driver = connect_driver(&target).await?;

    match load_from_remote(&mut driver, backend.as_ref(), state.as_ref(), &outputs, &opts).await? {
        Some(key) => ui::step_ok(&ctx, &format!("Restored builder state from {key}")),
        None => ui::step_info(&ctx, &format!("No cache found for {}", opts.primary_key)),
    }
    Ok(())
}
