//! # End-to-end, single node
//!
//! Drives a real TCP server through the client library: framed requests,
//! persistence across a server restart, and syntax-error handling on a
//! live connection.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use severn_client::KvClient;
use severn_core::Store;
use severn_server::{Backend, LocalBackend, TcpServer};

/// Boot a single-node server over `dir` on an ephemeral port. Returns the
/// address and a sender that stops the accept loop.
async fn start_server(dir: &TempDir) -> (String, oneshot::Sender<()>) {
    let store = Arc::new(
        Store::open(dir.path().join("kvs.log"))
            .await
            .expect("open store"),
    );
    start_server_with(Arc::new(LocalBackend::new(store, "unused"))).await
}

async fn start_server_with(backend: Arc<dyn Backend>) -> (String, oneshot::Sender<()>) {
    let server = TcpServer::bind("127.0.0.1:0", backend).await.expect("bind");
    let addr = server.local_addr().unwrap().to_string();

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    (addr, tx)
}

#[tokio::test]
async fn full_command_cycle_over_tcp() {
    let dir = TempDir::new().unwrap();
    let (addr, _stop) = start_server(&dir).await;

    let mut client = KvClient::connect(&addr).await.unwrap();

    client
        .set("greeting", "hello world", Duration::from_secs(3600))
        .await
        .unwrap();

    let (value, ttl) = client.get("greeting").await.unwrap();
    assert_eq!(value, "hello world");
    assert!(ttl > Duration::from_secs(3590));
    assert!(ttl <= Duration::from_secs(3600));

    let remaining = client.ttl("greeting").await.unwrap();
    assert!(remaining > Duration::from_secs(3590));

    client.delete("greeting").await.unwrap();
    let err = client.get("greeting").await.unwrap_err();
    assert_eq!(err.to_string(), "server error: Key not found");

    let status = client.status().await.unwrap();
    assert_eq!(status, "Node status: leader");
}

#[tokio::test]
async fn data_survives_server_restart() {
    let dir = TempDir::new().unwrap();

    {
        let (addr, stop) = start_server(&dir).await;
        let mut client = KvClient::connect(&addr).await.unwrap();
        client
            .set("durable", "still here", Duration::from_secs(3600))
            .await
            .unwrap();
        client.set("doomed", "gone", Duration::from_secs(3600)).await.unwrap();
        client.delete("doomed").await.unwrap();
        let _ = stop.send(());
    }

    let (addr, _stop) = start_server(&dir).await;
    let mut client = KvClient::connect(&addr).await.unwrap();

    let (value, _) = client.get("durable").await.unwrap();
    assert_eq!(value, "still here");
    assert!(client.get("doomed").await.is_err());
}

#[tokio::test]
async fn invalid_frame_keeps_connection_alive() {
    let dir = TempDir::new().unwrap();
    let (addr, _stop) = start_server(&dir).await;

    let stream = TcpStream::connect(&addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    writer.write_all(b"this is not json\n").await.unwrap();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.contains("Invalid command format"), "got: {line}");

    // The same connection still serves well-formed requests.
    line.clear();
    writer
        .write_all(b"{\"op\":\"STATUS\"}\n")
        .await
        .unwrap();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.contains("Node status: leader"), "got: {line}");
}

#[tokio::test]
async fn expired_key_is_gone_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let (addr, _stop) = start_server(&dir).await;

    let mut client = KvClient::connect(&addr).await.unwrap();
    client
        .set("flash", "gone soon", Duration::from_millis(50))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = client.get("flash").await.unwrap_err();
    assert_eq!(err.to_string(), "server error: Key not found");
    let err = client.ttl("flash").await.unwrap_err();
    assert_eq!(err.to_string(), "server error: Key not found or expired");
}

/// A clustered backend with no elected leader answers mutations with a
/// redirect whose address is empty, and reports itself a follower.
#[tokio::test]
async fn leaderless_cluster_node_redirects_with_empty_address() {
    let dir = TempDir::new().unwrap();
    let node = severn_raft::node::RaftNode::start(severn_raft::node::RaftNodeConfig {
        node_id: "isolated".into(),
        data_dir: dir.path().to_path_buf(),
        raft_addr: "127.0.0.1:0".parse().unwrap(),
        client_addr: "127.0.0.1:1".into(),
    })
    .await
    .expect("start node");

    let backend = Arc::new(severn_server::RaftBackend::new(node.engine.clone()));
    let (addr, _stop) = start_server_with(backend).await;

    let mut client = KvClient::connect(&addr).await.unwrap();

    let status = client.status().await.unwrap();
    assert_eq!(status, "Node status: follower");

    let err = client
        .set("k", "v", Duration::from_secs(60))
        .await
        .expect_err("write must be redirected");
    let severn_client::ClientError::Server(message) = err else {
        panic!("expected a server error carrying the redirect message");
    };
    assert_eq!(message, "Not the leader, try: ");
}
