//! Du command - print the builder's disk usage

use super::{connect_driver, resolve_builder};
use crate::cli::args::DuArgs;
use crate::config::Config;
use crate::driver::Driver;
use crate::error::BkStateResult;
use crate::ui;

/// Execute the du command
pub async fn execute(args: DuArgs, config: &Config) -> BkStateResult<()> {
    let target = resolve_builder(&args.builder, &config.builder)?;
    let driver = connect_driver(&target).await?;
    ui::print_report(&driver.print_disk_usage().await?);
    Ok(())
}
