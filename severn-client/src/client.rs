//! The connection-holding client.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use severn_core::protocol::{read_frame, write_frame, Request, Response, Status};

use crate::errors::{ClientError, Result};

const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct KvClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    server_addr: String,
}

impl KvClient {
    pub async fn connect(server_addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(server_addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            server_addr: server_addr.to_string(),
        })
    }

    /// The address of the server this client currently talks to; changes
    /// when a redirect is followed.
    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    /// Store `value` under `key` with the given time to live. Follows
    /// redirects to the leader.
    pub async fn set(&mut self, key: &str, value: &str, expires_in: Duration) -> Result<()> {
        self.mutate(Request {
            op: "SET".into(),
            key: key.into(),
            value: value.into(),
            expires_in: i64::try_from(expires_in.as_nanos()).unwrap_or(i64::MAX),
        })
        .await
    }

    /// Remove `key`. Follows redirects to the leader.
    pub async fn delete(&mut self, key: &str) -> Result<()> {
        self.mutate(Request {
            op: "DELETE".into(),
            key: key.into(),
            ..Request::default()
        })
        .await
    }

    /// Fetch `key`, returning the stored data and its remaining TTL.
    pub async fn get(&mut self, key: &str) -> Result<(String, Duration)> {
        let resp = self
            .send(&Request {
                op: "GET".into(),
                key: key.into(),
                ..Request::default()
            })
            .await?;

        if resp.status != Status::Success {
            return Err(ClientError::Server(resp.message));
        }
        Ok((resp.value, nanos_to_duration(resp.ttl)))
    }

    /// Remaining time to live for `key`.
    pub async fn ttl(&mut self, key: &str) -> Result<Duration> {
        let resp = self
            .send(&Request {
                op: "TTL".into(),
                key: key.into(),
                ..Request::default()
            })
            .await?;

        if resp.status != Status::Success {
            return Err(ClientError::Server(resp.message));
        }
        Ok(nanos_to_duration(resp.ttl))
    }

    /// The node's role, as a human-readable line.
    pub async fn status(&mut self) -> Result<String> {
        let resp = self
            .send(&Request {
                op: "STATUS".into(),
                ..Request::default()
            })
            .await?;

        if resp.status != Status::Success {
            return Err(ClientError::Server(resp.message));
        }
        Ok(resp.message)
    }

    /// Run a mutation with redirect handling: on `redirect`, reconnect to
    /// the advertised address and resubmit, up to [`MAX_RETRIES`] times
    /// with [`RETRY_DELAY`] between attempts.
    async fn mutate(&mut self, request: Request) -> Result<()> {
        for _ in 0..=MAX_RETRIES {
            let resp = self.send(&request).await?;
            match resp.status {
                Status::Success => return Ok(()),
                Status::Redirect => {
                    if let Some(addr) = extract_server_addr(&resp.message) {
                        if !addr.is_empty() && addr != self.server_addr {
                            debug!(%addr, "following redirect");
                            tokio::time::sleep(RETRY_DELAY).await;
                            self.reconnect(&addr).await?;
                            continue;
                        }
                    }
                    return Err(ClientError::Server(resp.message));
                }
                Status::Error => return Err(ClientError::Server(resp.message)),
            }
        }
        Err(ClientError::MaxRetries)
    }

    async fn reconnect(&mut self, server_addr: &str) -> Result<()> {
        let stream = TcpStream::connect(server_addr).await?;
        let (reader, writer) = stream.into_split();
        self.reader = BufReader::new(reader);
        self.writer = writer;
        self.server_addr = server_addr.to_string();
        Ok(())
    }

    async fn send(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.writer, request).await?;
        read_frame(&mut self.reader)
            .await?
            .ok_or(ClientError::ConnectionClosed)
    }
}

/// Pull the server address out of a redirect message: everything after
/// `try:`, trimmed.
pub fn extract_server_addr(message: &str) -> Option<String> {
    let (_, tail) = message.split_once("try:")?;
    Some(tail.trim().to_string())
}

fn nanos_to_duration(ttl: Option<i64>) -> Duration {
    Duration::from_nanos(ttl.unwrap_or(0).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::BufReader as TokioBufReader;
    use tokio::net::TcpListener;

    #[test]
    fn extracts_address_from_redirect_message() {
        assert_eq!(
            extract_server_addr("Not the leader, try: 10.0.0.7:8080"),
            Some("10.0.0.7:8080".to_string())
        );
        assert_eq!(
            extract_server_addr("Not the leader, try:  spaced.example:1  "),
            Some("spaced.example:1".to_string())
        );
        assert_eq!(extract_server_addr("Not the leader, try: "), Some(String::new()));
        assert_eq!(extract_server_addr("some other error"), None);
    }

    /// One-shot stub server: answers every request on a single connection
    /// with a canned response.
    async fn stub_server(response: Response) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let response = response.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = TokioBufReader::new(reader);
                    while let Ok(Some(_req)) = read_frame::<_, Request>(&mut reader).await {
                        if write_frame(&mut writer, &response).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    /// A redirect answer sends the client to the named server, where the
    /// retried mutation succeeds.
    #[tokio::test]
    async fn mutation_follows_redirect_to_leader() {
        let leader_addr = stub_server(Response::success()).await;
        let follower_addr = stub_server(Response::redirect(format!(
            "Not the leader, try: {}",
            leader_addr
        )))
        .await;

        let mut client = KvClient::connect(&follower_addr).await.unwrap();
        client
            .set("k", "v", Duration::from_secs(60))
            .await
            .expect("set succeeds after redirect");
        assert_eq!(client.server_addr(), leader_addr);
    }

    /// A redirect without a usable address is surfaced as a server error,
    /// not retried forever.
    #[tokio::test]
    async fn redirect_without_address_is_an_error() {
        let addr = stub_server(Response::redirect("Not the leader, try: ")).await;

        let mut client = KvClient::connect(&addr).await.unwrap();
        let err = client
            .set("k", "v", Duration::from_secs(60))
            .await
            .expect_err("no leader to follow");
        assert!(matches!(err, ClientError::Server(_)));
    }

    /// Servers that keep redirecting exhaust the retry budget.
    #[tokio::test]
    async fn redirect_loop_hits_retry_limit() {
        // Two stubs pointing at each other.
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap().to_string();
        let addr_b = listener_b.local_addr().unwrap().to_string();

        for (listener, target) in [(listener_a, addr_b.clone()), (listener_b, addr_a.clone())] {
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let message = format!("Not the leader, try: {}", target);
                    tokio::spawn(async move {
                        let (reader, mut writer) = stream.into_split();
                        let mut reader = TokioBufReader::new(reader);
                        while let Ok(Some(_req)) = read_frame::<_, Request>(&mut reader).await {
                            let resp = Response::redirect(message.clone());
                            if write_frame(&mut writer, &resp).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            });
        }

        let mut client = KvClient::connect(&addr_a).await.unwrap();
        let err = client
            .delete("k")
            .await
            .expect_err("ping-pong redirects must not loop forever");
        assert!(matches!(err, ClientError::MaxRetries));
    }
}
