//! Inter-node Raft transport: the listening side.
//!
//! Peers exchange one JSON object per newline-terminated line, the same
//! framing the client protocol uses. A request names the RPC and carries
//! the openraft payload as embedded JSON; the reply carries the response
//! payload or an error string, never both.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use severn_core::protocol::{read_frame, write_frame};

use crate::commands::Command;
use crate::typ::TypeConfig;
use openraft::Raft;

/// The RPCs a node serves to its peers. `ClientWrite` lets a follower hand
/// a command to the leader; it is used for node-address announcements, not
/// for client mutations (those get redirect responses instead).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RpcKind {
    AppendEntries,
    Vote,
    InstallSnapshot,
    ClientWrite,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcRequest {
    pub rpc: RpcKind,
    pub data: Json,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcReply {
    #[serde(default)]
    pub data: Json,
    #[serde(default)]
    pub error: String,
}

impl RpcReply {
    fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self {
                data,
                error: String::new(),
            },
            Err(e) => Self::err(format!("serialize response: {}", e)),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            data: Json::Null,
            error: message.into(),
        }
    }
}

/// Accept peer connections until the listener is dropped or the task is
/// aborted. Each connection serves a stream of RPC frames.
pub async fn serve(listener: TcpListener, raft: Raft<TypeConfig>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let raft = raft.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_peer(stream, raft).await {
                        debug!(%peer, error = %e, "raft peer connection closed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to accept raft peer connection");
            }
        }
    }
}

async fn handle_peer(stream: TcpStream, raft: Raft<TypeConfig>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(request) = read_frame::<_, RpcRequest>(&mut reader).await? {
        let reply = dispatch(&raft, request).await;
        write_frame(&mut writer, &reply).await?;
    }
    Ok(())
}

async fn dispatch(raft: &Raft<TypeConfig>, request: RpcRequest) -> RpcReply {
    match request.rpc {
        RpcKind::AppendEntries => match serde_json::from_value(request.data) {
            Ok(rpc) => match raft.append_entries(rpc).await {
                Ok(resp) => RpcReply::ok(&resp),
                Err(e) => RpcReply::err(e.to_string()),
            },
            Err(e) => RpcReply::err(format!("decode append_entries: {}", e)),
        },
        RpcKind::Vote => match serde_json::from_value(request.data) {
            Ok(rpc) => match raft.vote(rpc).await {
                Ok(resp) => RpcReply::ok(&resp),
                Err(e) => RpcReply::err(e.to_string()),
            },
            Err(e) => RpcReply::err(format!("decode vote: {}", e)),
        },
        RpcKind::InstallSnapshot => match serde_json::from_value(request.data) {
            Ok(rpc) => match raft.install_snapshot(rpc).await {
                Ok(resp) => RpcReply::ok(&resp),
                Err(e) => RpcReply::err(e.to_string()),
            },
            Err(e) => RpcReply::err(format!("decode install_snapshot: {}", e)),
        },
        RpcKind::ClientWrite => match serde_json::from_value::<Command>(request.data) {
            Ok(cmd) => match raft.client_write(cmd).await {
                Ok(resp) => RpcReply::ok(&resp.data),
                Err(e) => RpcReply::err(e.to_string()),
            },
            Err(e) => RpcReply::err(format!("decode client_write: {}", e)),
        },
    }
}
