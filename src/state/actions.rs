//! GitHub Actions step state and file commands

use crate::error::{BkStateError, BkStateResult};
use crate::state::StateStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// State written through `GITHUB_STATE` and read back as `STATE_<name>`
#[derive(Debug, Clone)]
pub struct ActionsState {
    state_file: PathBuf,
}

impl ActionsState {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    /// Present only when running under an Actions runner
    pub fn from_env() -> Option<Self> {
        std::env::var_os("GITHUB_STATE")
            .filter(|v| !v.is_empty())
            .map(|v| Self::new(PathBuf::from(v)))
    }
}

#[async_trait]
impl StateStore for ActionsState {
    async fn load(&self, name: &str) -> BkStateResult<Option<String>> {
        Ok(std::env::var(format!("STATE_{name}"))
            .ok()
            .filter(|v| !v.is_empty()))
    }

    async fn save(&self, name: &str, value: &str) -> BkStateResult<()> {
        append_command_file(&self.state_file, name, value).await
    }
}

/// Append `name=value` to a runner file command in heredoc form
pub async fn append_command_file(path: &Path, name: &str, value: &str) -> BkStateResult<()> {
    let delimiter = format!("ghadelimiter_{}", uuid::Uuid::new_v4());
    if name.contains(&delimiter) || value.contains(&delimiter) {
        return Err(BkStateError::Internal(format!(
            "value for {name} contains the heredoc delimiter"
        )));
    }

    let entry = format!("{name}<<{delimiter}\n{value}\n{delimiter}\n");
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| BkStateError::io(format!("opening {}", path.display()), e))?;
    file.write_all(entry.as_bytes())
        .await
        .map_err(|e| BkStateError::io(format!("writing {}", path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| BkStateError::io(format!("writing {}", path.display()), e))
}
