//! The TCP accept loop.
//!
//! One task per connection; each connection is a stream of
//! newline-delimited JSON requests answered in order. A frame that fails
//! to parse gets an error response and the connection stays open; EOF or a
//! read error ends the task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, warn};

use severn_core::protocol::{read_frame, write_frame, Request, Response};
use severn_core::Result;

use crate::backend::Backend;
use crate::router;

pub struct TcpServer {
    listener: TcpListener,
    backend: Arc<dyn Backend>,
}

impl TcpServer {
    pub async fn bind(addr: &str, backend: Arc<dyn Backend>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, backend })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let TcpServer { listener, backend } = self;
        info!(addr = ?listener.local_addr().ok(), "server listening");
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let backend = Arc::clone(&backend);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, backend).await {
                                    debug!(%peer, error = %e, "connection closed");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, backend: Arc<dyn Backend>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let request: Request = match read_frame(&mut reader).await {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                write_frame(&mut writer, &Response::error("Invalid command format")).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let response = router::process(backend.as_ref(), &request).await;
        write_frame(&mut writer, &response).await?;
    }
}
