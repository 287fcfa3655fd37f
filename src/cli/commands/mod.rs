//! CLI command implementations
//!
//! Settings resolve in order: flag or action input, config file, default.

pub mod config;
pub mod du;
pub mod load;
pub mod save;

pub use config::execute as config;
pub use du::execute as du;
pub use load::execute as load;
pub use save::execute as save;

use crate::cli::args::{BuilderArgs, RemoteArgs};
use crate::config::schema::{BuilderConfig, RemoteConfig};
use crate::driver::{connect_docker, container_name_for, docker::log_docker_version, ContainerDriver};
use crate::error::{BkStateError, BkStateResult};
use crate::remote::s3::S3Settings;
use crate::remote::{RemoteKind, RemoteSettings};
use tracing::{debug, Level};

/// The container to drive and how to reach its Docker daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderTarget {
    pub container: String,
    pub endpoint: Option<String>,
}

pub fn resolve_builder(args: &BuilderArgs, config: &BuilderConfig) -> BkStateResult<BuilderTarget> {
    let explicit = args
        .buildx_container_name
        .clone()
        .or_else(|| config.container.clone());
    let container = match explicit {
        Some(name) => name,
        None => {
            let builder = args
                .buildx_name
                .as_deref()
                .or(config.name.as_deref())
                .ok_or(BkStateError::MissingInput("buildx-name"))?;
            container_name_for(builder)
        }
    };
    Ok(BuilderTarget {
        container,
        endpoint: args
            .docker_endpoint
            .clone()
            .or_else(|| config.docker_endpoint.clone()),
    })
}

pub fn resolve_remote(args: &RemoteArgs, config: &RemoteConfig) -> BkStateResult<RemoteSettings> {
    let kind = match &args.remote_type {
        Some(raw) => raw.parse::<RemoteKind>()?,
        None => config.kind,
    };

    let s3 = S3Settings {
        bucket: args
            .s3_bucket_name
            .clone()
            .or_else(|| config.s3.bucket.clone())
            .unwrap_or_default(),
        key_prefix: args
            .s3_key_prefix
            .clone()
            .unwrap_or_else(|| config.s3.key_prefix.clone()),
        endpoint_url: args.s3_url.clone().or_else(|| config.s3.endpoint_url.clone()),
        region: config.s3.region.clone(),
    };
    if kind == RemoteKind::S3 && s3.bucket.is_empty() {
        return Err(BkStateError::MissingInput("s3-bucket-name"));
    }

    let local_path = args.local_path.clone().or_else(|| config.local.path.clone());
    if kind == RemoteKind::Local && local_path.is_none() {
        return Err(BkStateError::MissingInput("local-path"));
    }

    Ok(RemoteSettings {
        kind,
        s3,
        local_path,
    })
}

/// The primary key, which every transfer needs
pub fn require_cache_key(value: Option<String>) -> BkStateResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(BkStateError::MissingInput("cache-key"))
}

/// Connect to Docker and dial the builder's daemon
pub async fn connect_driver(target: &BuilderTarget) -> BkStateResult<ContainerDriver> {
    let docker = connect_docker(target.endpoint.as_deref())?;
    if tracing::enabled!(Level::DEBUG) {
        if let Err(e) = log_docker_version(&docker).await {
            debug!("Could not query Docker version: {e}");
        }
    }
    debug!(container = %target.container, "connecting to builder");
    ContainerDriver::connect(docker, target.container.clone()).await
}
