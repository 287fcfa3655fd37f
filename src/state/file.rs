//! JSON file state for runs outside GitHub Actions

use crate::error::{BkStateError, BkStateResult};
use crate::state::StateStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;

/// A flat JSON object of string values
#[derive(Debug, Clone)]
pub struct FileState {
    path: PathBuf,
}

impl FileState {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_all(&self) -> BkStateResult<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(BkStateError::io(
                format!("reading state from {}", self.path.display()),
                e,
            )),
        }
    }
}

#[async_trait]
impl StateStore for FileState {
    async fn load(&self, name: &str) -> BkStateResult<Option<String>> {
        Ok(self.read_all().await?.remove(name))
    }

    async fn save(&self, name: &str, value: &str) -> BkStateResult<()> {
        let mut values = self.read_all().await?;
        values.insert(name.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                BkStateError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }
        let content = serde_json::to_string_pretty(&values)?;
        fs::write(&self.path, content).await.map_err(|e| {
            BkStateError::io(format!("writing state to {}", self.path.display()), e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let state = FileState::new(temp.path().join("state.json"));
        assert!(state.load("loaded-cache-key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_merges_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("state.json");
        let state = FileState::new(path.clone());

        state.save("a", "1").await.unwrap();
        state.save("b", "2").await.unwrap();
        state.save("a", "3").await.unwrap();

        assert_eq!(state.load("a").await.unwrap().as_deref(), Some("3"));
        assert_eq!(state.load("b").await.unwrap().as_deref(), Some("2"));
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["a"], "3");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(FileState::new(path).load("a").await.is_err());
    }
}
