//! BuildKit daemon access
//!
//! - `mux`: duplex stream over a framed exec session
//! - `control`: BuildKit control API over that stream
//! - `docker`: container lifecycle and tar copy through the Docker API

pub mod control;
pub mod docker;
pub mod mux;
mod runtime;
pub mod usage;

pub use docker::{connect_docker, container_name_for, ContainerDriver};
pub use runtime::{ByteStream, Driver, TarStream};
pub use usage::{RecordType, UsageRecord};
