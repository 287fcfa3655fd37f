//! Backend selection

use crate::error::{BkStateError, BkStateResult};
use crate::remote::actions::{ActionsCacheBackend, ActionsCacheSettings};
use crate::remote::local::LocalBackend;
use crate::remote::s3::{S3Backend, S3Settings};
use crate::remote::RemoteBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Which storage holds the snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    Gha,
    S3,
    Local,
}

impl RemoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gha => "gha",
            Self::S3 => "s3",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteKind {
    type Err = BkStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gha" => Ok(Self::Gha),
            "s3" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            other => Err(BkStateError::UnknownRemote(other.to_string())),
        }
    }
}

/// Everything needed to build any backend
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub kind: RemoteKind,
    pub s3: S3Settings,
    pub local_path: Option<PathBuf>,
}

/// Build the backend named by `settings.kind`
pub async fn create_backend(settings: &RemoteSettings) -> BkStateResult<Box<dyn RemoteBackend>> {
    debug!(kind = %settings.kind, "creating remote backend");
    match settings.kind {
        RemoteKind::Gha => {
            let env = ActionsCacheSettings::from_env()?;
            Ok(Box::new(ActionsCacheBackend::new(&env)?))
        }
        RemoteKind::S3 => {
            if settings.s3.bucket.is_empty() {
                return Err(BkStateError::MissingInput("s3-bucket-name"));
            }
            Ok(Box::new(S3Backend::from_settings(&settings.s3).await))
        }
        RemoteKind::Local => {
            let path = settings
                .local_path
                .clone()
                .ok_or(BkStateError::MissingInput("local-path"))?;
            Ok(Box::new(LocalBackend::new(path)))
        }
    }
}
