//! Outbound side of cluster joins.

use std::time::Duration;

use severn_core::{KvError, Result};

use crate::api::JoinRequest;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask the node behind `target_api` to add us to the cluster. The target
/// must be the leader; a rejection is returned to the operator, who is
/// expected to retry against the leader (no automatic forwarding).
pub async fn join_cluster(target_api: &str, node_id: &str, raft_addr: &str) -> Result<()> {
    let url = format!("http://{}/join", target_api);
    let request = JoinRequest {
        node_id: node_id.to_string(),
        addr: raft_addr.to_string(),
    };

    let client = reqwest::Client::builder()
        .timeout(JOIN_TIMEOUT)
        .build()
        .map_err(|e| KvError::Config(e.to_string()))?;

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .await
        .map_err(|e| KvError::Config(format!("join request to {} failed: {}", target_api, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(KvError::Config(format!(
            "join request rejected with status {}: {}",
            status, body
        )));
    }

    Ok(())
}
