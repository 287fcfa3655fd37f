//! Console output for interactive use and for CI logs
//!
//! Inside GitHub Actions, sections become collapsible log groups and step
//! outputs are written through the runner's file commands. Elsewhere the
//! same calls print styled headers and plain `name=value` lines.

mod context;
mod output;
mod step;

pub use context::UiContext;
pub use output::{
    error_annotation, group, print_report, step_info, step_ok, step_warn,
    GroupGuard,
};
pub use step::{StepOutputs, WorkflowOutputs};
