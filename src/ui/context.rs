//! Detects where output is going

use std::io::IsTerminal;

/// UI context that determines output behavior
#[derive(Debug, Clone)]
pub struct UiContext {
    /// Whether running in an interactive terminal
    interactive: bool,
    /// Whether the GitHub Actions runner is reading the log
    github_actions: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        Self {
            interactive: Self::detect_interactive(),
            github_actions: Self::detect_github_actions(),
        }
    }

    /// Plain output, as in a generic CI log
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            github_actions: false,
        }
    }

    /// Workflow-command output, as under an Actions runner
    pub fn github_actions() -> Self {
        Self {
            interactive: false,
            github_actions: true,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn is_github_actions(&self) -> bool {
        self.github_actions
    }

    /// Check if we should use colors and decorations
    pub fn use_fancy_output(&self) -> bool {
        self.interactive && !self.github_actions
    }

    fn detect_github_actions() -> bool {
        std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true")
    }

    /// Detect if running in an interactive environment
    fn detect_interactive() -> bool {
        if !std::io::stdout().is_terminal() {
            return false;
        }

        if std::env::var("CI").is_ok() {
            return false;
        }

        // Common CI environment indicators
        let ci_vars = [
            "GITHUB_ACTIONS",
            "GITLAB_CI",
            "CIRCLECI",
            "TRAVIS",
            "JENKINS_URL",
            "BUILDKITE",
            "TEAMCITY_VERSION",
            "TF_BUILD",
        ];

        !ci_vars.iter().any(|var| std::env::var(var).is_ok())
    }
}
