//! Values carried from the load step to the save step of the same build

mod actions;
mod file;

pub use actions::{append_command_file, ActionsState};
pub use file::FileState;

use crate::config::ConfigManager;
use crate::error::BkStateResult;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Key restored by the load step
pub const LOADED_CACHE_KEY: &str = "loaded-cache-key";

/// Per-build key/value storage
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value; absent is `None`
    async fn load(&self, name: &str) -> BkStateResult<Option<String>>;

    /// Persist a value for later steps
    async fn save(&self, name: &str, value: &str) -> BkStateResult<()>;
}

/// Choose where state lives.
///
/// An explicit file wins, then the Actions runner, then a file in the
/// user's state directory.
pub fn create_state_store(file: Option<PathBuf>) -> Box<dyn StateStore> {
    if let Some(path) = file {
        debug!(path = %path.display(), "using state file");
        return Box::new(FileState::new(path));
    }
    if let Some(state) = ActionsState::from_env() {
        debug!("using GitHub Actions step state");
        return Box::new(state);
    }
    let path = ConfigManager::state_dir().join("state.json");
    debug!(path = %path.display(), "using default state file");
    Box::new(FileState::new(path))
}
