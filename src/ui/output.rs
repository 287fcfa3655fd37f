//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::style;

/// Open section; the section closes when the guard drops
#[must_use = "the group closes as soon as the guard is dropped"]
pub struct GroupGuard {
    github_actions: bool,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.github_actions {
            println!("::endgroup::");
        }
    }
}

/// Start a titled section of the log
pub fn group(title: &str) -> GroupGuard {
    group_in(&UiContext::detect(), title)
}

pub(crate) fn group_in(ctx: &UiContext, title: &str) -> GroupGuard {
    if ctx.is_github_actions() {
        println!("::group::{title}");
    } else {
        section(ctx, title);
    }
    GroupGuard {
        github_actions: ctx.is_github_actions(),
    }
}

/// Display a section header
fn section(ctx: &UiContext, title: &str) {
    println!();
    if ctx.use_fancy_output() {
        println!("{}", style(title).cyan().bold());
    } else {
        println!("== {title} ==");
    }
}

/// Print a multi-line report verbatim
pub fn print_report(report: &str) {
    print!("{report}");
    if !report.ends_with('\n') {
        println!();
    }
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("✓").green(), message);
    } else {
        println!("  {} {}", style("[OK]").green(), message);
    }
}

/// Display a warning step
pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.is_github_actions() {
        println!("::warning::{}", escape_data(message));
    } else {
        println!("  {} {}", style("[WARN]").yellow(), message);
    }
}

/// Display an info step
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("•").cyan(), message);
    } else {
        println!("  {} {}", style("[INFO]").cyan(), message);
    }
}

/// Workflow command that marks the step as failed with `message`
pub fn error_annotation(message: &str) -> String {
    format!("::error::{}", escape_data(message))
}

/// Escape a workflow command payload
fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        // These should not panic
        let _group = group_in(&ctx, "Load cache from remote");
        step_ok(&ctx, "Step completed");
        step_warn(&ctx, "Warning");
        step_info(&ctx, "Info");
        print_report("ID: abc\n");
    }

    #[test]
    fn annotation_escapes_newlines_and_percent() {
        assert_eq!(
            error_annotation("100% broken\r\nsecond line"),
            "::error::100%25 broken%0D%0Asecond line"
        );
    }

    #[test]
    fn actions_group_guard_closes() {
        let guard = group_in(&UiContext::github_actions(), "Resume buildkitd");
        assert!(guard.github_actions);
    }
}
