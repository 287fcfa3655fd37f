//! CLI argument definitions using clap derive
//!
//! Every operational flag can also be supplied as a GitHub Actions input
//! (`INPUT_<NAME>` environment variable). Empty inputs count as unset.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Persist BuildKit builder state across CI runs
///
/// Snapshots a buildx builder's cache into S3, the GitHub Actions cache or
/// a local directory, and restores it into a fresh builder later.
#[derive(Parser, Debug)]
#[command(name = "buildkit-state")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BKSTATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON file carrying the restored key from `load` to `save`
    #[arg(long, global = true, env = "BKSTATE_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore the best matching snapshot into the builder
    Load(LoadArgs),

    /// Prune, snapshot and upload the builder state
    Save(SaveArgs),

    /// Print the builder's disk usage report
    Du(DuArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Which builder to operate on
#[derive(Args, Debug, Default, Clone)]
pub struct BuilderArgs {
    /// buildx builder name
    #[arg(long, env = "INPUT_BUILDX-NAME")]
    pub buildx_name: Option<String>,

    /// Builder container name, overriding the buildx naming scheme
    #[arg(long, env = "INPUT_BUILDX-CONTAINER-NAME")]
    pub buildx_container_name: Option<String>,

    /// Docker endpoint (unix://, tcp:// or http://); defaults honour DOCKER_HOST
    #[arg(long)]
    pub docker_endpoint: Option<String>,
}

/// Where snapshots are stored
#[derive(Args, Debug, Default, Clone)]
pub struct RemoteArgs {
    /// Remote type: gha, s3 or local
    #[arg(long, env = "INPUT_REMOTE-TYPE")]
    pub remote_type: Option<String>,

    /// S3 bucket name
    #[arg(long, env = "INPUT_S3-BUCKET-NAME")]
    pub s3_bucket_name: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "INPUT_S3-KEY-PREFIX")]
    pub s3_key_prefix: Option<String>,

    /// Custom S3 endpoint; enables path-style addressing
    #[arg(long, env = "INPUT_S3-URL")]
    pub s3_url: Option<String>,

    /// Directory for the local remote
    #[arg(long, env = "INPUT_LOCAL-PATH")]
    pub local_path: Option<PathBuf>,
}

/// Arguments for the load command
#[derive(Parser, Debug)]
pub struct LoadArgs {
    #[command(flatten)]
    pub builder: BuilderArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Primary cache key
    #[arg(long, env = "INPUT_CACHE-KEY")]
    pub cache_key: Option<String>,

    /// Fallback key prefixes, newline separated
    #[arg(long, env = "INPUT_CACHE-RESTORE-KEYS", value_delimiter = '\n')]
    pub cache_restore_keys: Vec<String>,

    /// Start the builder again after restoring
    #[arg(long, env = "INPUT_RESUME-BUILDER", value_parser = parse_bool)]
    pub resume_builder: Option<bool>,
}

/// Arguments for the save command
#[derive(Parser, Debug)]
pub struct SaveArgs {
    #[command(flatten)]
    pub builder: BuilderArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Key to save under
    #[arg(long, env = "INPUT_CACHE-KEY")]
    pub cache_key: Option<String>,

    /// Record types to keep, newline separated
    #[arg(long, env = "INPUT_TARGET-TYPES", value_delimiter = '\n')]
    pub target_types: Vec<String>,

    /// Save even if the restored key equals the cache key
    #[arg(long, env = "INPUT_REWRITE-CACHE", value_parser = parse_bool)]
    pub rewrite_cache: Option<bool>,

    /// zstd compression level
    #[arg(long, env = "INPUT_COMPRESSION-LEVEL", allow_hyphen_values = true)]
    pub compression_level: Option<i32>,
}

/// Arguments for the du command
#[derive(Parser, Debug)]
pub struct DuArgs {
    #[command(flatten)]
    pub builder: BuilderArgs,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., remote.kind)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Parse a boolean the way action inputs are usually written
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(format!("invalid boolean '{other}'")),
    }
}

/// Trim entries of a multiline input and drop the blank ones
pub fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
