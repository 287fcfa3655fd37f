//! Integration tests for buildkit-state

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// The binary with runner variables cleared and an isolated config
    fn bin(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("buildkit-state");
        for var in [
            "GITHUB_ACTIONS",
            "GITHUB_STATE",
            "GITHUB_OUTPUT",
            "RUNNER_DEBUG",
            "BKSTATE_STATE_FILE",
            "INPUT_CACHE-KEY",
            "INPUT_BUILDX-NAME",
            "INPUT_REMOTE-TYPE",
            "INPUT_COMPRESSION-LEVEL",
        ] {
            cmd.env_remove(var);
        }
        cmd.env("BKSTATE_CONFIG", temp.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Persist BuildKit builder state"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("buildkit-state"));
    }

    #[test]
    fn config_path_honours_override() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_prints_defaults() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[transfer]"))
            .stdout(predicate::str::contains("compression_level = 19"));
    }

    #[test]
    fn config_set_persists() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .args(["config", "set", "remote.kind", "local"])
            .assert()
            .success();
        bin(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kind = \"local\""));
    }

    #[test]
    fn save_skips_when_key_unchanged() {
        let temp = TempDir::new().unwrap();
        let state = temp.path().join("state.json");
        std::fs::write(&state, r#"{"loaded-cache-key":"linux-abc"}"#).unwrap();

        // No Docker daemon is needed: the skip happens before connecting.
        bin(&temp)
            .args(["save", "--cache-key", "linux-abc", "--buildx-name", "ci"])
            .arg("--state-file")
            .arg(&state)
            .assert()
            .success()
            .stdout(predicate::str::contains("Cache key matched. Ignore cache saving."));
    }

    #[test]
    fn unknown_remote_type_fails() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .args([
                "load",
                "--cache-key",
                "k",
                "--buildx-name",
                "ci",
                "--remote-type",
                "ftp",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown remote type: ftp"));
    }

    #[test]
    fn out_of_range_compression_level_fails() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .args([
                "save",
                "--cache-key",
                "k",
                "--buildx-name",
                "ci",
                "--compression-level",
                "1000",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Compression level 1000"));
    }

    #[test]
    fn unknown_target_type_fails() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .args([
                "save",
                "--cache-key",
                "k",
                "--buildx-name",
                "ci",
                "--target-types",
                "exec.cachemount\nbogus",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown record type: bogus"));
    }

    #[test]
    fn missing_cache_key_fails() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .args(["load", "--buildx-name", "ci"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cache-key"));
    }

    #[test]
    fn actions_error_annotation() {
        let temp = TempDir::new().unwrap();
        bin(&temp)
            .env("GITHUB_ACTIONS", "true")
            .args(["load", "--buildx-name", "ci"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("::error::Missing required input: cache-key"));
    }
}
