//! Builder driver abstraction
//!
//! The transfer pipeline and orchestrator only talk to the daemon through
//! this trait, so they can be exercised without Docker.

use crate::driver::usage::RecordType;
use crate::error::BkStateResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::io;

/// Fallible byte stream read from a container or a remote
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Archive stream written into a container
pub type TarStream = BoxStream<'static, Bytes>;

/// Uniform facade over a BuildKit daemon running in a container
///
/// Callers must not run other methods concurrently with `resume`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Stop the daemon's container
    async fn stop(&self) -> BkStateResult<()>;

    /// Start the container again and redial the control client
    async fn resume(&mut self) -> BkStateResult<()>;

    /// Evict every record type not listed in `keep`
    async fn prune_except(&self, keep: &[RecordType]) -> BkStateResult<()>;

    /// Render the verbose disk usage report followed by its summary
    async fn print_disk_usage(&self) -> BkStateResult<String>;

    /// Extract `path` as a tar stream.
    ///
    /// The size is a buffer-sizing hint only; the stream end is authoritative.
    /// The container driver reports the total from the most recent disk usage
    /// report rather than a declared archive size, and 0 when no report has
    /// been taken yet.
    async fn copy_from(&self, path: &str) -> BkStateResult<(ByteStream, u64)>;

    /// Extract a tar stream into `path`, overwriting existing files
    async fn copy_to(&self, path: &str, content: TarStream) -> BkStateResult<()>;
}
