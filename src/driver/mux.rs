//! Duplex connection over a framed exec session
//!
//! Docker multiplexes the stdout and stderr of a non-TTY exec session into
//! one framed stream. `MuxConn` demultiplexes it in a background task and
//! exposes the stdout bytes as a plain `AsyncRead`, while writes go straight
//! to the session's stdin. This is what lets a gRPC client talk to
//! `buildctl dial-stdio` as if it were a socket.

use bollard::container::LogOutput;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

/// Chunks buffered between the demultiplexer and the reader
const PIPE_DEPTH: usize = 16;

/// Logical channel a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
    Console,
}

/// One demultiplexed frame of exec output
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Bytes,
}

impl From<LogOutput> for Frame {
    fn from(output: LogOutput) -> Self {
        let (channel, payload) = match output {
            LogOutput::StdIn { message } => (Channel::Stdin, message),
            LogOutput::StdOut { message } => (Channel::Stdout, message),
            LogOutput::StdErr { message } => (Channel::Stderr, message),
            LogOutput::Console { message } => (Channel::Console, message),
        };
        Self { channel, payload }
    }
}

/// Framed output of an attached exec session
pub type FrameStream = BoxStream<'static, io::Result<Frame>>;

/// Raw stdin of an attached exec session
pub type RawWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Failure while closing a [`MuxConn`]
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("closing exec connection: {0}")]
    Conn(#[source] io::Error),

    #[error("demultiplexing exec output: {0}")]
    Demux(#[source] io::Error),

    #[error("closing exec connection: {conn}; demultiplexing exec output: {demux}")]
    Both { conn: io::Error, demux: io::Error },
}

impl CloseError {
    fn from_parts(conn: Option<io::Error>, demux: Option<io::Error>) -> Option<Self> {
        match (conn, demux) {
            (None, None) => None,
            (Some(conn), None) => Some(Self::Conn(conn)),
            (None, Some(demux)) => Some(Self::Demux(demux)),
            (Some(conn), Some(demux)) => Some(Self::Both { conn, demux }),
        }
    }
}

/// Clean duplex byte stream over an exec session
pub struct MuxConn {
    writer: RawWriter,
    pipe: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
    eof: bool,
    stop: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<io::Result<()>>>,
}

impl MuxConn {
    /// Wrap an attached session and start demultiplexing its output.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(frames: FrameStream, writer: RawWriter) -> Self {
        let (tx, rx) = mpsc::channel(PIPE_DEPTH);
        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = tokio::spawn(demux(frames, tx, stop_rx));

        Self {
            writer,
            pipe: rx,
            pending: Bytes::new(),
            eof: false,
            stop: Some(stop_tx),
            worker: Some(worker),
        }
    }

    /// Close stdin, then wait for the demultiplexer to exit.
    ///
    /// Both failures are reported when both happen.
    pub async fn close(mut self) -> Result<(), CloseError> {
        let conn = self.writer.shutdown().await.err();

        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let demux = match self.worker.take() {
            Some(handle) => match handle.await {
                Ok(result) => result.err(),
                Err(join) => Some(io::Error::other(join)),
            },
            None => None,
        };

        match CloseError::from_parts(conn, demux) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn demux(
    mut frames: FrameStream,
    tx: mpsc::Sender<io::Result<Bytes>>,
    mut stop: oneshot::Receiver<()>,
) -> io::Result<()> {
    loop {
        // Ready frames are drained before a stop request is honoured.
        let next = tokio::select! {
            biased;
            next = frames.next() => next,
            _ = &mut stop => return Ok(()),
        };

        let item = match next {
            None => return Ok(()),
            Some(Ok(frame)) if frame.channel == Channel::Stdout => Ok(frame.payload),
            Some(Ok(frame)) => {
                trace!(channel = ?frame.channel, len = frame.payload.len(), "discarding auxiliary frame");
                continue;
            }
            Some(Err(err)) => {
                let forwarded = io::Error::new(err.kind(), format!("exec output: {err}"));
                tokio::select! {
                    biased;
                    _ = tx.send(Err(forwarded)) => {}
                    _ = &mut stop => {}
                }
                return Err(err);
            }
        };

        tokio::select! {
            biased;
            sent = tx.send(item) => {
                if sent.is_err() {
                    // Reader is gone; nobody is left to consume output.
                    return Ok(());
                }
            }
            _ = &mut stop => return Ok(()),
        }
    }
}

impl AsyncRead for MuxConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = buf.remaining().min(this.pending.len());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }
            match ready!(this.pipe.poll_recv(cx)) {
                Some(Ok(chunk)) => this.pending = chunk,
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => this.eof = true,
            }
        }
    }
}

impl AsyncWrite for MuxConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().writer.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().writer.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().writer.as_mut().poll_shutdown(cx)
    }
}
