//! Snapshot transfer between the builder and a remote backend
//!
//! - `codec`: streaming zstd compression and decompression
//! - `load`: remote → builder lifecycle
//! - `save`: builder → remote lifecycle

pub mod codec;
mod load;
mod save;

pub use codec::{compress_state, restore_state, CompressionLevel};
pub use load::{load_from_remote, LoadOptions};
pub use save::{save_to_remote, should_skip_save, SaveOptions};

/// Directory inside the builder container that is snapshotted
pub const STATE_DIR: &str = "/var/lib/buildkit";

/// Directory the snapshot archive is extracted into.
///
/// The archive's top-level entry is `buildkit/`, so this is `STATE_DIR`'s parent.
pub const RESTORE_DIR: &str = "/var/lib";

/// Step output naming the key a snapshot was restored from
pub const OUTPUT_RESTORED_CACHE_KEY: &str = "restored-cache-key";
