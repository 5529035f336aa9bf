use thiserror::Error;

pub type Result<T> = std::result::Result<T, KvError>;

/// Errors surfaced by the store, the write-ahead log and the replication
/// engine. The `NotLeader` display string is part of the wire contract:
/// the request router matches on it to produce redirect responses.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("not the leader")]
    NotLeader,

    #[error("commit timed out after {0} ms; the write may still be applied")]
    CommitTimeout(u64),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cluster configuration error: {0}")]
    Config(String),

    #[error("consensus error: {0}")]
    Consensus(String),
}

impl KvError {
    /// True when a mutation was rejected because this node is not the
    /// cluster leader and the caller should redirect to it.
    pub fn is_not_leader(&self) -> bool {
        matches!(self, KvError::NotLeader)
    }
}
