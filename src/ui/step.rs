//! Step outputs consumed by later workflow steps

use crate::error::BkStateResult;
use crate::state::append_command_file;
use async_trait::async_trait;
use std::path::PathBuf;

/// Sink for named step outputs
#[async_trait]
pub trait StepOutputs: Send + Sync {
    async fn set_output(&self, name: &str, value: &str) -> BkStateResult<()>;
}

/// Writes to `GITHUB_OUTPUT` when the runner provides it, stdout otherwise
#[derive(Debug, Clone, Default)]
pub struct WorkflowOutputs {
    output_file: Option<PathBuf>,
}

impl WorkflowOutputs {
    pub fn new(output_file: Option<PathBuf>) -> Self {
        Self { output_file }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os("GITHUB_OUTPUT")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        )
    }
}

#[async_trait]
impl StepOutputs for WorkflowOutputs {
    async fn set_output(&self, name: &str, value: &str) -> BkStateResult<()> {
        match &self.output_file {
            Some(path) => append_command_file(path, name, value).await,
            None => {
                println!("{name}={value}");
                Ok(())
            }
        }
    }
}
