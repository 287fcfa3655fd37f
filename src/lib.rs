//! buildkit-state - persist BuildKit builder state across CI runs
//!
//! Snapshots a buildx builder's state directory, compresses it with zstd
//! and stores it in S3, the GitHub Actions cache or a local directory.
//! A later run restores the best matching snapshot into a fresh builder.

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod remote;
pub mod state;
pub mod transfer;
pub mod ui;

#[cfg(test)]
mod testing;

pub use error::{BkStateError, BkStateResult};
