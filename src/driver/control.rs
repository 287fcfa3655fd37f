//! BuildKit control API client
//!
//! Only the two calls needed here are modelled: `DiskUsage` and `Prune`.
//! The client runs over any duplex connection, which in practice is a
//! [`MuxConn`] bridging to `buildctl dial-stdio` inside the builder.

use crate::driver::mux::{CloseError, MuxConn};
use crate::driver::usage::UsageRecord;
use crate::error::{BkStateError, BkStateResult};
use chrono::{DateTime, Utc};
use hyper_util::rt::TokioIo;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Request, Status};
use tower::service_fn;
use tracing::debug;

const DISK_USAGE_PATH: &str = "/moby.buildkit.v1.Control/DiskUsage";
const PRUNE_PATH: &str = "/moby.buildkit.v1.Control/Prune";

/// Wire messages of `moby.buildkit.v1.Control`
pub mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DiskUsageRequest {
        #[prost(string, repeated, tag = "1")]
        pub filter: Vec<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DiskUsageResponse {
        #[prost(message, repeated, tag = "1")]
        pub record: Vec<UsageRecord>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UsageRecord {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(bool, tag = "2")]
        pub mutable: bool,
        #[prost(bool, tag = "3")]
        pub in_use: bool,
        #[prost(int64, tag = "4")]
        pub size: i64,
        #[prost(string, tag = "5")]
        pub parent: String,
        #[prost(message, optional, tag = "6")]
        pub created_at: Option<prost_types::Timestamp>,
        #[prost(message, optional, tag = "7")]
        pub last_used_at: Option<prost_types::Timestamp>,
        #[prost(int64, tag = "8")]
        pub usage_count: i64,
        #[prost(string, tag = "9")]
        pub description: String,
        #[prost(string, tag = "10")]
        pub record_type: String,
        #[prost(bool, tag = "11")]
        pub shared: bool,
        #[prost(string, repeated, tag = "12")]
        pub parents: Vec<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PruneRequest {
        #[prost(string, repeated, tag = "1")]
        pub filter: Vec<String>,
        #[prost(bool, tag = "2")]
        pub all: bool,
        #[prost(int64, tag = "3")]
        pub keep_duration: i64,
        #[prost(int64, tag = "4")]
        pub keep_bytes: i64,
    }
}

fn timestamp(ts: Option<prost_types::Timestamp>) -> Option<DateTime<Utc>> {
    let ts = ts?;
    DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).unwrap_or(0))
}

impl From<pb::UsageRecord> for UsageRecord {
    fn from(record: pb::UsageRecord) -> Self {
        // Older daemons only fill the single deprecated parent field.
        let parents = if record.parents.is_empty() && !record.parent.is_empty() {
            vec![record.parent]
        } else {
            record.parents
        };

        Self {
            id: record.id,
            parents,
            created_at: timestamp(record.created_at),
            mutable: record.mutable,
            in_use: record.in_use,
            shared: record.shared,
            size: record.size,
            description: record.description,
            usage_count: record.usage_count,
            last_used_at: timestamp(record.last_used_at),
            record_type: record.record_type,
        }
    }
}

/// Bytes buffered between the gRPC transport and the exec session
const BRIDGE_BUFFER: usize = 64 * 1024;

/// gRPC client for the BuildKit control service
pub struct ControlClient {
    grpc: Grpc<Channel>,
    shutdown: oneshot::Sender<()>,
    bridge: JoinHandle<Result<(), CloseError>>,
}

impl ControlClient {
    /// Run an HTTP/2 client over an already-dialed connection.
    ///
    /// The connection is driven by a bridge task that closes it when the
    /// client is closed or dropped.
    pub async fn connect(conn: MuxConn) -> BkStateResult<Self> {
        let (transport, bridged) = tokio::io::duplex(BRIDGE_BUFFER);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let bridge = tokio::spawn(bridge(bridged, conn, shutdown_rx));

        let slot = Arc::new(Mutex::new(Some(transport)));
        let channel = Endpoint::from_static("http://buildkitd")
            .connect_with_connector(service_fn(move |_: Uri| {
                let slot = Arc::clone(&slot);
                async move {
                    let transport = slot
                        .lock()
                        .map_err(|_| io::Error::other("exec connection slot poisoned"))?
                        .take()
                        .ok_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::NotConnected,
                                "exec connection already used; resume to redial",
                            )
                        })?;
                    Ok::<_, io::Error>(TokioIo::new(transport))
                }
            }))
            .await
            .map_err(BkStateError::ControlConnect)?;

        Ok(Self {
            grpc: Grpc::new(channel),
            shutdown,
            bridge,
        })
    }

    /// Drop the gRPC channel and close the exec connection under it
    pub async fn close(self) -> BkStateResult<()> {
        let Self {
            grpc,
            shutdown,
            bridge,
        } = self;
        drop(grpc);
        let _ = shutdown.send(());
        bridge
            .await
            .map_err(|e| BkStateError::Internal(format!("control bridge failed: {e}")))??;
        Ok(())
    }

    async fn ready(&self, op: &'static str) -> BkStateResult<Grpc<Channel>> {
        let mut grpc = self.grpc.clone();
        grpc.ready().await.map_err(|e| BkStateError::Control {
            op,
            source: Status::unavailable(format!("service not ready: {e}")),
        })?;
        Ok(grpc)
    }

    /// Query every usage record the daemon tracks
    pub async fn disk_usage(&self) -> BkStateResult<Vec<UsageRecord>> {
        let mut grpc = self.ready("DiskUsage").await?;
        let response = grpc
            .unary(
                Request::new(pb::DiskUsageRequest { filter: Vec::new() }),
                PathAndQuery::from_static(DISK_USAGE_PATH),
                ProstCodec::<pb::DiskUsageRequest, pb::DiskUsageResponse>::default(),
            )
            .await
            .map_err(|source| BkStateError::Control {
                op: "DiskUsage",
                source,
            })?;

        Ok(response
            .into_inner()
            .record
            .into_iter()
            .map(UsageRecord::from)
            .collect())
    }

    /// Evict records matching any of `filters`, returning bytes reclaimed
    pub async fn prune(&self, filters: Vec<String>) -> BkStateResult<u64> {
        let mut grpc = self.ready("Prune").await?;
        let request = pb::PruneRequest {
            filter: filters,
            ..Default::default()
        };
        let mut stream = grpc
            .server_streaming(
                Request::new(request),
                PathAndQuery::from_static(PRUNE_PATH),
                ProstCodec::<pb::PruneRequest, pb::UsageRecord>::default(),
            )
            .await
            .map_err(|source| BkStateError::Control { op: "Prune", source })?
            .into_inner();

        let mut records = 0usize;
        let mut reclaimed = 0u64;
        while let Some(record) = stream
            .message()
            .await
            .map_err(|source| BkStateError::Control { op: "Prune", source })?
        {
            records += 1;
            reclaimed += u64::try_from(record.size).unwrap_or(0);
        }

        debug!(records, reclaimed, "prune finished");
        Ok(reclaimed)
    }
}

/// Shuttle bytes between the transport and `conn` until either side ends
/// or `shutdown` fires, then close `conn`
async fn bridge(
    mut bridged: DuplexStream,
    mut conn: MuxConn,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), CloseError> {
    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut bridged, &mut conn) => {
            if let Err(e) = copied {
                debug!(error = %e, "control connection ended");
            }
        }
        _ = shutdown => {}
    }
    conn.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mux::FrameStream;
    use futures_util::{stream, StreamExt};
    use prost::Message;

    fn pending_conn() -> (MuxConn, DuplexStream) {
        let frames: FrameStream = stream::pending().boxed();
        let (stdin, peer) = tokio::io::duplex(64);
        (MuxConn::new(frames, Box::pin(stdin)), peer)
    }

    #[tokio::test]
    async fn bridge_closes_connection_on_shutdown() {
        let (conn, _stdin) = pending_conn();
        let (_transport, bridged) = tokio::io::duplex(64);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(bridge(bridged, conn, shutdown_rx));

        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bridge_closes_when_client_is_dropped() {
        let (conn, _stdin) = pending_conn();
        let (_transport, bridged) = tokio::io::duplex(64);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(bridge(bridged, conn, shutdown_rx));

        drop(shutdown);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bridge_reports_demux_failure_on_close() {
        let frames: FrameStream =
            stream::iter(vec![Err(io::Error::other("socket reset"))]).boxed();
        let (stdin, _peer) = tokio::io::duplex(64);
        let conn = MuxConn::new(frames, Box::pin(stdin));
        let (_transport, bridged) = tokio::io::duplex(64);
        let (_shutdown, shutdown_rx) = oneshot::channel();

        let err = bridge(bridged, conn, shutdown_rx).await.unwrap_err();
        assert!(matches!(err, CloseError::Demux(_)));

        let wrapped = BkStateError::from(err);
        assert!(wrapped.to_string().contains("socket reset"));
    }

    #[test]
    fn usage_record_from_wire() {
        let wire = pb::UsageRecord {
            id: "r1".into(),
            in_use: true,
            size: 42,
            created_at: Some(prost_types::Timestamp {
                seconds: 1_700_000_000,
                nanos: 0,
            }),
            record_type: "exec.cachemount".into(),
            parents: vec!["p".into()],
            ..Default::default()
        };
        let decoded = pb::UsageRecord::decode(wire.encode_to_vec().as_slice()).unwrap();
        let record = UsageRecord::from(decoded);

        assert_eq!(record.id, "r1");
        assert!(record.in_use);
        assert_eq!(record.size, 42);
        assert_eq!(record.parents, vec!["p".to_string()]);
        assert_eq!(record.created_at.unwrap().timestamp(), 1_700_000_000);
        assert!(record.last_used_at.is_none());
    }

    #[test]
    fn legacy_parent_is_promoted() {
        let record = UsageRecord::from(pb::UsageRecord {
            parent: "old".into(),
            ..Default::default()
        });
        assert_eq!(record.parents, vec!["old".to_string()]);
    }

    #[test]
    fn prune_request_encodes_filters() {
        let request = pb::PruneRequest {
            filter: vec!["type==regular".into(), "type==internal".into()],
            ..Default::default()
        };
        let decoded = pb::PruneRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.filter.len(), 2);
        assert!(!decoded.all);
    }
}
