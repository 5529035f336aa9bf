//! # Administrative HTTP surface
//!
//! Status, join and snapshot endpoints against a live single-node cluster.

mod common;

use severn_raft::api::{self, ApiState, StatusResponse};
use tokio::net::TcpListener;

/// Bind the admin API for a node on an ephemeral port, return its base URL.
async fn serve_api(node: &severn_raft::node::RaftNode, name: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ApiState {
        engine: node.engine.clone(),
        node_id: name.to_string(),
        addr: node.raft_addr().to_string(),
    };
    tokio::spawn(async move {
        let _ = api::serve(listener, state).await;
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn status_reports_leadership() {
    let (node, _tmp) = common::start_node().await;
    let base = serve_api(&node, "test-node").await;

    let resp = reqwest::get(format!("{base}/status")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let status: StatusResponse = resp.json().await.unwrap();
    assert_eq!(status.node_id, "test-node");
    assert_eq!(status.addr, node.raft_addr());
    assert!(status.leader);
    assert!(status.leading.is_none(), "leader must omit `leading`");
}

#[tokio::test]
async fn status_on_leaderless_node_omits_leading() {
    let tmp = tempfile::TempDir::new().unwrap();
    let port = common::next_port();
    let node = common::start_node_at(tmp.path(), "adrift", port, "127.0.0.1:1").await;
    let base = serve_api(&node, "adrift").await;

    let status: StatusResponse = reqwest::get(format!("{base}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!status.leader);
    assert!(status.leading.is_none(), "no leader known yet");
}

#[tokio::test]
async fn malformed_join_body_is_bad_request() {
    let (node, _tmp) = common::start_node().await;
    let base = serve_api(&node, "test-node").await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/join"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.text().await.unwrap(), "Invalid request");
}

#[tokio::test]
async fn join_of_existing_member_succeeds() {
    let (node, _tmp) = common::start_node().await;
    let base = serve_api(&node, "test-node").await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/join"))
        .json(&serde_json::json!({
            "node_id": "test-node",
            "addr": node.raft_addr(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn snapshot_endpoint_on_leader() {
    let (node, _tmp) = common::start_node().await;
    let base = serve_api(&node, "test-node").await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/snapshot"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "Snapshot created successfully");
}

#[tokio::test]
async fn snapshot_endpoint_on_non_leader_redirects() {
    let tmp = tempfile::TempDir::new().unwrap();
    let port = common::next_port();
    let node = common::start_node_at(tmp.path(), "adrift", port, "127.0.0.1:1").await;
    let base = serve_api(&node, "adrift").await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/snapshot"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(resp
        .text()
        .await
        .unwrap()
        .starts_with("Not the leader, try:"));
}
