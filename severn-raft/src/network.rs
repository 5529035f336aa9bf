//! Inter-node Raft transport: the calling side.
//!
//! Implements `RaftNetworkFactory` and `RaftNetwork` over the framed-TCP
//! protocol in [`crate::transport`]. Connections are opened lazily, reused
//! across RPCs, and dropped on any failure so the next call reconnects.

use std::future::Future;
use std::io;

use openraft::error::{
    InstallSnapshotError, RPCError, RaftError, ReplicationClosed, StreamingError,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    SnapshotResponse, VoteRequest, VoteResponse,
};
use openraft::storage::Snapshot;
use openraft::{BasicNode, OptionalSend, Vote};
use serde_json::Value as Json;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::warn;

use severn_core::protocol::{read_frame, write_frame};
use severn_core::KvError;

use crate::commands::{Command, CommandResponse};
use crate::transport::{RpcKind, RpcReply, RpcRequest};
use crate::typ::TypeConfig;

type NodeId = u64;
type Node = BasicNode;

/// Factory that creates framed-TCP connections to peer nodes.
#[derive(Clone, Default)]
pub struct TcpNetworkFactory;

impl RaftNetworkFactory<TypeConfig> for TcpNetworkFactory {
    type Network = TcpPeer;

    async fn new_client(&mut self, _target: NodeId, node: &Node) -> Self::Network {
        TcpPeer::new(node.addr.clone())
    }
}

enum CallError {
    /// Connect or transport failure; the peer may be down.
    Unreachable(io::Error),
    /// The peer answered with an error string.
    Remote(String),
}

/// Connection to a single Raft peer.
pub struct TcpPeer {
    addr: String,
    conn: Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>,
}

impl TcpPeer {
    pub fn new(addr: String) -> Self {
        Self { addr, conn: None }
    }

    /// Send one RPC and wait for its reply. The cached connection is only
    /// put back after a complete round trip, so any transport failure
    /// forces a reconnect on the next call.
    async fn call(&mut self, rpc: RpcKind, data: Json) -> Result<Json, CallError> {
        let (mut reader, mut writer) = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let stream = TcpStream::connect(&self.addr)
                    .await
                    .map_err(CallError::Unreachable)?;
                let (reader, writer) = stream.into_split();
                (BufReader::new(reader), writer)
            }
        };

        let request = RpcRequest { rpc, data };
        write_frame(&mut writer, &request)
            .await
            .map_err(CallError::Unreachable)?;

        match read_frame::<_, RpcReply>(&mut reader).await {
            Ok(Some(reply)) => {
                self.conn = Some((reader, writer));
                if !reply.error.is_empty() {
                    return Err(CallError::Remote(reply.error));
                }
                Ok(reply.data)
            }
            Ok(None) => Err(CallError::Unreachable(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            ))),
            Err(e) => Err(CallError::Unreachable(e)),
        }
    }

    async fn typed_call<Req, Resp, RE>(
        &mut self,
        rpc: RpcKind,
        request: &Req,
    ) -> Result<Resp, RPCError<NodeId, Node, RE>>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
        RE: std::error::Error,
    {
        let data = serde_json::to_value(request).map_err(|e| net_err(&e.to_string()))?;
        let reply = match self.call(rpc, data).await {
            Ok(reply) => reply,
            Err(CallError::Unreachable(e)) => return Err(unreachable_err(&e)),
            Err(CallError::Remote(msg)) => return Err(net_err(&msg)),
        };
        serde_json::from_value(reply).map_err(|e| net_err(&e.to_string()))
    }
}

impl RaftNetwork<TypeConfig> for TcpPeer {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, Node, RaftError<NodeId>>> {
        self.typed_call(RpcKind::AppendEntries, &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, Node, RaftError<NodeId>>> {
        self.typed_call(RpcKind::Vote, &rpc).await
    }

    async fn full_snapshot(
        &mut self,
        vote: Vote<NodeId>,
        snapshot: Snapshot<TypeConfig>,
        _cancel: impl Future<Output = ReplicationClosed> + OptionalSend + 'static,
        option: RPCOption,
    ) -> Result<SnapshotResponse<NodeId>, StreamingError<TypeConfig, openraft::error::Fatal<NodeId>>>
    {
        // The snapshot is one JSON document; ship it in a single RPC.
        let snapshot_data = snapshot.snapshot.into_inner();
        let resp = self
            .install_snapshot(
                InstallSnapshotRequest {
                    vote,
                    meta: snapshot.meta.clone(),
                    offset: 0,
                    data: snapshot_data,
                    done: true,
                },
                option,
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "install_snapshot failed");
                let io = io::Error::new(io::ErrorKind::Other, e.to_string());
                StreamingError::Unreachable(openraft::error::Unreachable::new(&io))
            })?;

        Ok(SnapshotResponse { vote: resp.vote })
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, Node, RaftError<NodeId, InstallSnapshotError>>,
    > {
        self.typed_call(RpcKind::InstallSnapshot, &rpc).await
    }
}

/// One-shot command forward to a peer's `client_write` RPC. Used by a
/// freshly started node to announce its addresses through the leader.
pub async fn forward_command(addr: &str, cmd: &Command) -> Result<CommandResponse, KvError> {
    let mut peer = TcpPeer::new(addr.to_string());
    let data = serde_json::to_value(cmd).map_err(|e| KvError::Consensus(e.to_string()))?;
    let reply = match peer.call(RpcKind::ClientWrite, data).await {
        Ok(reply) => reply,
        Err(CallError::Unreachable(e)) => {
            return Err(KvError::Consensus(format!("peer unreachable: {}", e)))
        }
        Err(CallError::Remote(msg)) => return Err(KvError::Consensus(msg)),
    };
    serde_json::from_value(reply).map_err(|e| KvError::Consensus(e.to_string()))
}

fn unreachable_err<RE: std::error::Error>(
    e: &(impl std::error::Error + 'static),
) -> RPCError<NodeId, Node, RE> {
    RPCError::Unreachable(openraft::error::Unreachable::new(e))
}

fn net_err<RE: std::error::Error>(msg: &str) -> RPCError<NodeId, Node, RE> {
    let e = io::Error::new(io::ErrorKind::Other, msg.to_string());
    RPCError::Network(openraft::error::NetworkError::new(&e))
}
