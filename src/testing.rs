//! In-memory stand-ins for the daemon, the remote and the runner

use crate::driver::{ByteStream, Driver, RecordType, TarStream};
use crate::error::{BkStateError, BkStateResult};
use crate::remote::matcher::{Candidate, KeyMatcher, Selection};
use crate::remote::{combined_keys, LoadedCache, RemoteBackend};
use crate::state::StateStore;
use crate::ui::StepOutputs;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

const SOURCE_CHUNK: usize = 4096;

/// Driver operations in the order they were requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Stop,
    Resume,
    PruneExcept(Vec<RecordType>),
    PrintDiskUsage,
    CopyFrom(String),
    CopyTo(String),
}

#[derive(Debug, Default)]
pub struct FakeDriver {
    archive: Vec<u8>,
    fail_source: bool,
    fail_inject: bool,
    fail_stop: bool,
    calls: Mutex<Vec<DriverCall>>,
    injected: Mutex<Option<(String, Vec<u8>)>>,
}

impl FakeDriver {
    /// `copy_from` yields `archive`
    pub fn with_archive(archive: Vec<u8>) -> Self {
        Self {
            archive,
            ..Default::default()
        }
    }

    /// `copy_from` yields `partial` and then an I/O error
    pub fn with_failing_source(partial: Vec<u8>) -> Self {
        Self {
            archive: partial,
            fail_source: true,
            ..Default::default()
        }
    }

    /// `copy_to` refuses the upload without reading it
    pub fn with_failing_inject() -> Self {
        Self {
            fail_inject: true,
            ..Default::default()
        }
    }

    pub fn with_failing_stop() -> Self {
        Self {
            fail_stop: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn copied_from(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::CopyFrom(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Destination and bytes of the last completed `copy_to`
    pub fn injected(&self) -> Option<(String, Vec<u8>)> {
        self.injected.lock().unwrap().clone()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn stop(&self) -> BkStateResult<()> {
        self.record(DriverCall::Stop);
        if self.fail_stop {
            return Err(BkStateError::Internal("container refused to stop".into()));
        }
        Ok(())
    }

    async fn resume(&mut self) -> BkStateResult<()> {
        self.record(DriverCall::Resume);
        Ok(())
    }

    async fn prune_except(&self, keep: &[RecordType]) -> BkStateResult<()> {
        self.record(DriverCall::PruneExcept(keep.to_vec()));
        Ok(())
    }

    async fn print_disk_usage(&self) -> BkStateResult<String> {
        self.record(DriverCall::PrintDiskUsage);
        Ok("ID:\tfake\nTotal:\t0 B\n".to_string())
    }

    async fn copy_from(&self, path: &str) -> BkStateResult<(ByteStream, u64)> {
        self.record(DriverCall::CopyFrom(path.to_string()));
        let mut chunks: Vec<io::Result<Bytes>> = self
            .archive
            .chunks(SOURCE_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if self.fail_source {
            chunks.push(Err(io::Error::other("container went away")));
        }
        Ok((stream::iter(chunks).boxed(), self.archive.len() as u64))
    }

    async fn copy_to(&self, path: &str, mut content: TarStream) -> BkStateResult<()> {
        self.record(DriverCall::CopyTo(path.to_string()));
        if self.fail_inject {
            return Err(BkStateError::Internal("upload refused".into()));
        }
        let mut received = Vec::new();
        while let Some(chunk) = content.next().await {
            received.extend_from_slice(&chunk);
        }
        *self.injected.lock().unwrap() = Some((path.to_string(), received));
        Ok(())
    }
}

/// Remote holding snapshots in memory
#[derive(Debug, Default)]
pub struct FakeBackend {
    entries: Mutex<Vec<(String, Vec<u8>, i64)>>,
    saved: Mutex<Vec<(String, Bytes)>>,
}

impl FakeBackend {
    /// Store `data` under `key` as if written at unix time `secs`
    pub fn insert(&self, key: &str, data: Vec<u8>, secs: i64) {
        self.entries
            .lock()
            .unwrap()
            .push((key.to_string(), data, secs));
    }

    pub fn saved(&self) -> Vec<(String, Bytes)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteBackend for FakeBackend {
    async fn load(
        &self,
        primary: &str,
        secondary: &[String],
    ) -> BkStateResult<Option<LoadedCache>> {
        let matcher = KeyMatcher::new(combined_keys(primary, secondary));
        let mut selection = Selection::default();
        for (name, data, secs) in self.entries.lock().unwrap().iter() {
            let candidate = Candidate {
                name: name.clone(),
                modified: DateTime::from_timestamp(*secs, 0),
                item: data.clone(),
            };
            if selection.offer(&matcher, candidate) {
                break;
            }
        }

        Ok(selection.into_inner().map(|found| LoadedCache {
            key: found.name,
            data: stream::iter(vec![Ok(Bytes::from(found.item))]).boxed(),
            extra: HashMap::new(),
        }))
    }

    async fn save(&self, key: &str, data: Bytes) -> BkStateResult<()> {
        self.saved.lock().unwrap().push((key.to_string(), data));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryState {
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }
}

#[async_trait]
impl StateStore for MemoryState {
    async fn load(&self, name: &str) -> BkStateResult<Option<String>> {
        Ok(self.get(name))
    }

    async fn save(&self, name: &str, value: &str) -> BkStateResult<()> {
        self.set(name, value);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingOutputs {
    values: Mutex<HashMap<String, String>>,
}

impl RecordingOutputs {
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl StepOutputs for RecordingOutputs {
    async fn set_output(&self, name: &str, value: &str) -> BkStateResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}
