//! Restore a snapshot from the remote into the builder

use crate::driver::Driver;
use crate::error::BkStateResult;
use crate::remote::RemoteBackend;
use crate::state::{StateStore, LOADED_CACHE_KEY};
use crate::transfer::{codec, OUTPUT_RESTORED_CACHE_KEY};
use crate::ui::{self, StepOutputs};
use tracing::{debug, info};

/// Inputs of the load path
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub primary_key: String,
    pub restore_keys: Vec<String>,
    pub resume_builder: bool,
}

/// Resolve a snapshot and inject it into the builder.
///
/// Returns the resolved key, or `None` when nothing matched; in that case the
/// recorded key is cleared. Phases that already ran are not rolled back on
/// failure.
pub async fn load_from_remote(
    driver: &mut dyn Driver,
    backend: &dyn RemoteBackend,
    state: &dyn StateStore,
    outputs: &dyn StepOutputs,
    opts: &LoadOptions,
) -> BkStateResult<Option<String>> {
    let loaded = {
        let _group = ui::group("Load cache from remote");
        debug!(primary = %opts.primary_key, restore_keys = ?opts.restore_keys, "resolving cache");

        match backend.load(&opts.primary_key, &opts.restore_keys).await? {
            Some(loaded) => {
                info!("Found cache from key: {}", loaded.key);
                outputs
                    .set_output(OUTPUT_RESTORED_CACHE_KEY, &loaded.key)
                    .await?;
                loaded
            }
            None => {
                info!("Can not find cache, skipping state loading");
                // A key left by an earlier build must not make `save` skip.
                state.save(LOADED_CACHE_KEY, "").await?;
                return Ok(None);
            }
        }
    };

    state.save(LOADED_CACHE_KEY, &loaded.key).await?;
    let key = loaded.key.clone();

    {
        let _group = ui::group("Load cache to docker");
        info!("Stopping buildkitd");
        driver.stop().await?;

        info!("Restoring cache into buildkitd");
        codec::restore_state(&*driver, loaded.data).await?;
    }

    if !opts.resume_builder {
        debug!("Skip resuming");
        return Ok(Some(key));
    }

    {
        let _group = ui::group("Resume buildkitd");
        info!("Starting buildkitd");
        driver.resume().await?;
        ui::print_report(&driver.print_disk_usage().await?);
    }

    Ok(Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FileState;
    use crate::testing::{DriverCall, FakeBackend, FakeDriver, MemoryState, RecordingOutputs};
    use crate::transfer::save::should_skip_save;
    use crate::transfer::RESTORE_DIR;

    fn options(resume: bool) -> LoadOptions {
        LoadOptions {
            primary_key: "linux-abc".into(),
            restore_keys: vec!["linux-".into()],
            resume_builder: resume,
        }
    }

    fn compressed(data: &[u8]) -> Vec<u8> {
        zstd::encode_all(data, 3).unwrap()
    }

    #[tokio::test]
    async fn not_found_leaves_builder_alone() {
        let mut driver = FakeDriver::default();
        let backend = FakeBackend::default();
        let state = MemoryState::default();
        let outputs = RecordingOutputs::default();

        let key = load_from_remote(&mut driver, &backend, &state, &outputs, &options(true))
            .await
            .unwrap();

        assert!(key.is_none());
        assert!(driver.calls().is_empty());
        assert!(outputs.get(OUTPUT_RESTORED_CACHE_KEY).is_none());
        assert_eq!(state.get(LOADED_CACHE_KEY).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn not_found_clears_key_from_earlier_build() {
        let temp = tempfile::TempDir::new().unwrap();
        let state = FileState::new(temp.path().join("state.json"));
        state.save(LOADED_CACHE_KEY, "linux-abc").await.unwrap();

        let key = load_from_remote(
            &mut FakeDriver::default(),
            &FakeBackend::default(),
            &state,
            &RecordingOutputs::default(),
            &options(true),
        )
        .await
        .unwrap();

        assert!(key.is_none());
        assert!(!should_skip_save(&state, "linux-abc", false).await.unwrap());
    }

    #[tokio::test]
    async fn found_snapshot_is_injected_and_recorded() {
        let mut driver = FakeDriver::default();
        let backend = FakeBackend::default();
        backend.insert("linux-old", compressed(b"tar bytes"), 10);
        let state = MemoryState::default();
        let outputs = RecordingOutputs::default();

        let key = load_from_remote(&mut driver, &backend, &state, &outputs, &options(false))
            .await
            .unwrap();

        assert_eq!(key.as_deref(), Some("linux-old"));
        assert_eq!(outputs.get(OUTPUT_RESTORED_CACHE_KEY).as_deref(), Some("linux-old"));
        assert_eq!(state.get(LOADED_CACHE_KEY).as_deref(), Some("linux-old"));
        assert_eq!(
            driver.calls(),
            vec![DriverCall::Stop, DriverCall::CopyTo(RESTORE_DIR.into())]
        );
        assert_eq!(driver.injected().unwrap().1, b"tar bytes");
    }

    #[tokio::test]
    async fn resume_reconnects_and_reports() {
        let mut driver = FakeDriver::default();
        let backend = FakeBackend::default();
        backend.insert("linux-abc", compressed(b"x"), 1);

        load_from_remote(
            &mut driver,
            &backend,
            &MemoryState::default(),
            &RecordingOutputs::default(),
            &options(true),
        )
        .await
        .unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Stop,
                DriverCall::CopyTo(RESTORE_DIR.into()),
                DriverCall::Resume,
                DriverCall::PrintDiskUsage,
            ]
        );
    }

    #[tokio::test]
    async fn stop_failure_aborts_remaining_phases() {
        let mut driver = FakeDriver::with_failing_stop();
        let backend = FakeBackend::default();
        backend.insert("linux-abc", compressed(b"x"), 1);
        let state = MemoryState::default();

        let result = load_from_remote(
            &mut driver,
            &backend,
            &state,
            &RecordingOutputs::default(),
            &options(true),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(driver.calls(), vec![DriverCall::Stop]);
        // Key resolution already completed and is not rolled back.
        assert_eq!(state.get(LOADED_CACHE_KEY).as_deref(), Some("linux-abc"));
    }
}
