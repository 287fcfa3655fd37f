//! Streaming zstd pipeline between the builder container and a remote
//!
//! Neither direction holds the uncompressed archive in memory: compression
//! drains the container's tar stream chunk by chunk into the encoder, and
//! decompression hands decoded chunks straight to the container upload.

use crate::driver::{ByteStream, Driver};
use crate::error::{BkStateError, BkStateResult, TransferPhase};
use crate::transfer::{RESTORE_DIR, STATE_DIR};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use std::io::{self, BufWriter, Read, Write};
use tokio::sync::mpsc;
use tracing::debug;

/// Chunks in flight between the async side and the codec thread
const STAGING_CHUNKS: usize = 8;

/// Size of decoded chunks handed to the container upload
const DECODED_CHUNK: usize = 256 * 1024;

/// Encoder window; 512 MiB, the largest window common decoders accept
const WINDOW_LOG: u32 = 29;

/// Decoder window limit; accepts any window zstd can produce
const MAX_WINDOW_LOG: u32 = 31;

/// Cap on the up-front output allocation
const MAX_PREALLOC: u64 = 1 << 30;

/// Validated zstd compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(i32);

impl CompressionLevel {
    /// Level used when none is configured
    pub const DEFAULT: i32 = 19;

    /// Accept any level the zstd library supports; never clamps
    pub fn new(level: i32) -> BkStateResult<Self> {
        let range = zstd::compression_level_range();
        if range.contains(&level) {
            Ok(Self(level))
        } else {
            Err(BkStateError::CompressionLevel {
                level,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Extract the state directory and compress it into one buffer.
///
/// The buffer is pre-sized to half the driver's size hint.
pub async fn compress_state(driver: &dyn Driver, level: CompressionLevel) -> BkStateResult<Bytes> {
    let (mut source, size_hint) = driver.copy_from(STATE_DIR).await?;
    let (tx, rx) = mpsc::channel::<Bytes>(STAGING_CHUNKS);
    let encoder = tokio::task::spawn_blocking(move || encode(rx, level, size_hint));

    let mut read_error = None;
    let mut read_bytes = 0u64;
    while let Some(chunk) = source.next().await {
        match chunk {
            Ok(chunk) => {
                read_bytes += chunk.len() as u64;
                if tx.send(chunk).await.is_err() {
                    // Encoder already failed; its error is collected below.
                    break;
                }
            }
            Err(e) => {
                read_error = Some(BkStateError::transfer(TransferPhase::ReadSource, e));
                break;
            }
        }
    }
    drop(tx);
    drop(source);

    let encoded = encoder
        .await
        .map_err(|e| BkStateError::Internal(format!("compression worker failed: {e}")))?;

    match (read_error, encoded) {
        (None, Ok(buf)) => {
            debug!(read_bytes, compressed = buf.len(), "snapshot compressed");
            Ok(Bytes::from(buf))
        }
        (Some(read), Ok(_)) => Err(read),
        (None, Err(write)) => Err(write),
        (Some(read), Err(write)) => Err(read.join(write)),
    }
}

fn encode(
    mut rx: mpsc::Receiver<Bytes>,
    level: CompressionLevel,
    size_hint: u64,
) -> BkStateResult<Vec<u8>> {
    let write_err = |e| BkStateError::transfer(TransferPhase::WriteCompressed, e);

    let capacity = usize::try_from((size_hint / 2).min(MAX_PREALLOC)).unwrap_or(0);
    let mut encoder =
        zstd::stream::write::Encoder::new(Vec::with_capacity(capacity), level.get())
            .map_err(write_err)?;
    encoder.window_log(WINDOW_LOG).map_err(write_err)?;
    encoder.long_distance_matching(true).map_err(write_err)?;
    encoder.include_checksum(true).map_err(write_err)?;
    encoder
        .multithread(u32::try_from(num_cpus::get()).unwrap_or(1))
        .map_err(write_err)?;

    while let Some(chunk) = rx.blocking_recv() {
        encoder.write_all(&chunk).map_err(write_err)?;
    }
    encoder.finish().map_err(write_err)
}

/// Decompress `compressed` straight into the container's restore directory.
///
/// The stream is released on every path. All failures are reported, joined.
pub async fn restore_state(driver: &dyn Driver, compressed: ByteStream) -> BkStateResult<()> {
    let (in_tx, in_rx) = mpsc::channel::<io::Result<Bytes>>(STAGING_CHUNKS);
    let (out_tx, out_rx) = mpsc::channel::<Bytes>(STAGING_CHUNKS);

    let decoder = tokio::task::spawn_blocking(move || decode(ChannelReader::new(in_rx), out_tx));

    let decoded = stream::unfold(out_rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    })
    .boxed();

    let (pumped, injected) = tokio::join!(
        pump(compressed, in_tx),
        driver.copy_to(RESTORE_DIR, decoded)
    );
    let decoded = decoder
        .await
        .map_err(|e| BkStateError::Internal(format!("decompression worker failed: {e}")))?;

    let injected = injected.map_err(|e| match e {
        e @ BkStateError::Transfer { .. } => e,
        other => BkStateError::transfer(TransferPhase::Inject, io::Error::other(other)),
    });

    let failures: Vec<BkStateError> = [pumped.err(), decoded.err(), injected.err()]
        .into_iter()
        .flatten()
        .collect();
    match BkStateError::combine(failures) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn pump(mut compressed: ByteStream, tx: mpsc::Sender<io::Result<Bytes>>) -> BkStateResult<()> {
    while let Some(chunk) = compressed.next().await {
        match chunk {
            Ok(chunk) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    // Decoder stopped early; it reports why.
                    return Ok(());
                }
            }
            Err(e) => {
                let _ = tx
                    .send(Err(io::Error::new(e.kind(), "compressed input aborted")))
                    .await;
                return Err(BkStateError::transfer(TransferPhase::ReadCompressed, e));
            }
        }
    }
    Ok(())
}

fn decode(reader: ChannelReader, tx: mpsc::Sender<Bytes>) -> BkStateResult<()> {
    let decode_err = |e| BkStateError::transfer(TransferPhase::Decompress, e);

    let mut decoder = zstd::stream::read::Decoder::new(reader).map_err(decode_err)?;
    decoder.window_log_max(MAX_WINDOW_LOG).map_err(decode_err)?;

    let mut sink = BufWriter::with_capacity(DECODED_CHUNK, ChunkSink { tx });
    let copied = io::copy(&mut decoder, &mut sink).and_then(|n| sink.flush().map(|_| n));
    match copied {
        Ok(n) => {
            debug!(decoded_bytes = n, "snapshot decompressed");
            Ok(())
        }
        // Upload side hung up; its own error explains why.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(decode_err(e)),
    }
}

/// Blocking `Read` over chunks arriving from the async side
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    chunk: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            chunk: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.chunk.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk.split_to(n));
        Ok(n)
    }
}

/// Blocking `Write` that forwards each write as one chunk
struct ChunkSink {
    tx: mpsc::Sender<Bytes>,
}

impl Write for ChunkSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut chunk = BytesMut::with_capacity(buf.len());
        chunk.extend_from_slice(buf);
        self.tx
            .blocking_send(chunk.freeze())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "container upload closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDriver;

    fn sample_archive() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let files: [(&str, Vec<u8>); 3] = [
            ("buildkit/runc-overlayfs/metadata_v2.db", b"metadata".repeat(512)),
            ("buildkit/cache.db", (0..=255u8).cycle().take(300_000).collect()),
            ("buildkit/empty", Vec::new()),
        ];
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn level_range_is_enforced() {
        assert!(CompressionLevel::new(19).is_ok());
        assert!(CompressionLevel::new(1).is_ok());
        let err = CompressionLevel::new(1000).unwrap_err();
        assert!(matches!(err, BkStateError::CompressionLevel { level: 1000, .. }));
        assert_eq!(CompressionLevel::default().get(), 19);
    }

    #[tokio::test]
    async fn round_trip_reproduces_archive() {
        let archive = sample_archive();
        let source = FakeDriver::with_archive(archive.clone());

        let compressed = compress_state(&source, CompressionLevel::new(3).unwrap())
            .await
            .unwrap();
        assert!(compressed.len() < archive.len());
        assert_eq!(source.copied_from(), vec![STATE_DIR.to_string()]);

        let target = FakeDriver::default();
        let chunks: Vec<io::Result<Bytes>> = compressed
            .chunks(1000)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        restore_state(&target, stream::iter(chunks).boxed())
            .await
            .unwrap();

        let (path, injected) = target.injected().unwrap();
        assert_eq!(path, RESTORE_DIR);
        assert_eq!(injected, archive);

        let dir = tempfile::TempDir::new().unwrap();
        tar::Archive::new(injected.as_slice()).unpack(dir.path()).unwrap();
        let db = std::fs::read(dir.path().join("buildkit/cache.db")).unwrap();
        assert_eq!(db.len(), 300_000);
    }

    #[tokio::test]
    async fn source_read_error_fails_save() {
        let source = FakeDriver::with_failing_source(b"partial".to_vec());
        let err = compress_state(&source, CompressionLevel::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BkStateError::Transfer {
                phase: TransferPhase::ReadSource,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn corrupt_input_fails_decompression() {
        let target = FakeDriver::default();
        let garbage = stream::iter(vec![Ok(Bytes::from_static(b"definitely not zstd"))]).boxed();
        let err = restore_state(&target, garbage).await.unwrap_err();
        assert!(err.to_string().contains("could not decompress snapshot"));
    }

    #[tokio::test]
    async fn download_error_is_reported_with_phase() {
        let target = FakeDriver::default();
        let broken = stream::iter(vec![Err(io::Error::other("connection reset"))]).boxed();
        let err = restore_state(&target, broken).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("could not read compressed snapshot: connection reset"));
    }

    #[tokio::test]
    async fn inject_failure_is_reported() {
        let archive = sample_archive();
        let compressed = zstd::encode_all(archive.as_slice(), 3).unwrap();
        let target = FakeDriver::with_failing_inject();
        let err = restore_state(&target, stream::iter(vec![Ok(Bytes::from(compressed))]).boxed())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BkStateError::Transfer {
                phase: TransferPhase::Inject,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "could not inject into destination: Internal error: upload refused"
        );
    }
}
