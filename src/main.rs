//! buildkit-state - persist BuildKit builder state across CI runs
//!
//! CLI entry point that dispatches to subcommands.

use buildkit_state::cli::{commands, Cli, Commands};
use buildkit_state::config::ConfigManager;
use buildkit_state::error::BkStateResult;
use buildkit_state::ui::{self, UiContext};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            return ExitCode::from(130);
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if UiContext::detect().is_github_actions() {
                println!("{}", ui::error_annotation(&e.to_string()));
            }
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Log level: `-v` info, `-vv` debug; runners default to info and
/// `RUNNER_DEBUG=1` turns on debug
fn log_filter(verbose: u8, github_actions: bool, runner_debug: bool) -> EnvFilter {
    let level = match verbose {
        _ if runner_debug => "debug",
        0 if github_actions => "info",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    EnvFilter::new(format!("buildkit_state={level}"))
}

fn init_logging(verbose: u8, json: bool) {
    let filter = log_filter(
        verbose,
        UiContext::detect().is_github_actions(),
        std::env::var("RUNNER_DEBUG").is_ok_and(|v| v == "1"),
    );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time();
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> BkStateResult<()> {
    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, config.general.log_format == "json");

    match cli.command {
        Commands::Load(args) => commands::load(args, &config, cli.state_file).await,
        Commands::Save(args) => commands::save(args, &config, cli.state_file).await,
        Commands::Du(args) => commands::du(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}
