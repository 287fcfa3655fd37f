//! Config command - show or edit configuration

use crate::cli::args::{parse_bool, ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::driver::RecordType;
use crate::error::{BkStateError, BkStateResult};
use crate::transfer::CompressionLevel;
use crate::ui::{self, UiContext};

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "builder.name",
    "builder.container",
    "builder.docker_endpoint",
    "remote.kind",
    "remote.s3.bucket",
    "remote.s3.key_prefix",
    "remote.s3.endpoint_url",
    "remote.s3.region",
    "remote.local.path",
    "transfer.compression_level",
    "transfer.target_types",
    "transfer.resume_builder",
    "transfer.rewrite_cache",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
) -> BkStateResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            let mut updated = config.clone();
            apply_setting(&mut updated, &key, &value)?;
            manager.save(&updated).await?;
            ui::step_ok(&UiContext::detect(), &format!("Set {} = {}", key, value));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> BkStateResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> BkStateResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn(
            &ctx,
            &format!(
                "Config already exists at {} - use --force to overwrite",
                path.display()
            ),
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok(
        &ctx,
        &format!("Configuration initialized at {}", path.display()),
    );
    Ok(())
}

/// Set one dot-separated key, validating the value
fn apply_setting(config: &mut Config, key: &str, value: &str) -> BkStateResult<()> {
    let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => return Err(invalid(key, value, "expected text or json")),
        },

        ["builder", "name"] => config.builder.name = optional(value),
        ["builder", "container"] => config.builder.container = optional(value),
        ["builder", "docker_endpoint"] => config.builder.docker_endpoint = optional(value),

        ["remote", "kind"] => config.remote.kind = value.parse()?,
        ["remote", "s3", "bucket"] => config.remote.s3.bucket = optional(value),
        ["remote", "s3", "key_prefix"] => config.remote.s3.key_prefix = value.to_string(),
        ["remote", "s3", "endpoint_url"] => config.remote.s3.endpoint_url = optional(value),
        ["remote", "s3", "region"] => config.remote.s3.region = optional(value),
        ["remote", "local", "path"] => config.remote.local.path = optional(value).map(Into::into),

        ["transfer", "compression_level"] => {
            let level: i32 = value
                .parse()
                .map_err(|_| invalid(key, value, "expected an integer"))?;
            config.transfer.compression_level = CompressionLevel::new(level)?.get();
        }
        ["transfer", "target_types"] => {
            let names: Vec<&str> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            let types = RecordType::parse_list(&names)?;
            config.transfer.target_types = types.iter().map(ToString::to_string).collect();
        }
        ["transfer", "resume_builder"] => {
            config.transfer.resume_builder =
                parse_bool(value).map_err(|reason| invalid(key, value, &reason))?
        }
        ["transfer", "rewrite_cache"] => {
            config.transfer.rewrite_cache =
                parse_bool(value).map_err(|reason| invalid(key, value, &reason))?
        }

        _ => {
            return Err(BkStateError::InvalidInput {
                name: "config key",
                value: key.to_string(),
                reason: format!("valid keys are {}", VALID_KEYS.join(", ")),
            })
        }
    }
    Ok(())
}

fn invalid(key: &str, value: &str, reason: &str) -> BkStateError {
    BkStateError::InvalidInput {
        name: "config value",
        value: value.to_string(),
        reason: format!("{key}: {reason}"),
    }
}
