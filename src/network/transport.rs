//! Opening the byte stream a handler runs on.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{Result, WireError};
use crate::BoxFuture;

/// Any bidirectional byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Creates a fresh transport for each connection attempt.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>>;
}

/// Default connect timeout per server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP to a list of servers, rotating on failure.
pub struct TcpConnector {
    servers: Vec<String>,
    next: AtomicUsize,
    timeout: Duration,
}

impl TcpConnector {
    /// `servers` are `host:port` strings, tried in order starting with the
    /// last one that worked.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect_one(&self, addr: &str) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| WireError::ConnectionClosed(format!("connect to {} timed out", addr)))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
        Box::pin(async move {
            if self.servers.is_empty() {
                return Err(WireError::ConnectionClosed("no servers configured".into()));
            }
            let start = self.next.load(Ordering::Relaxed);
            let mut last = None;
            for i in 0..self.servers.len() {
                let index = (start + i) % self.servers.len();
                let addr = &self.servers[index];
                match self.connect_one(addr).await {
                    Ok(stream) => {
                        debug!(%addr, "connected");
                        self.next.store(index, Ordering::Relaxed);
                        return Ok(Box::new(stream) as BoxedStream);
                    }
                    Err(e) => {
                        warn!(%addr, error = %e, "connect failed");
                        last = Some(e);
                    }
                }
            }
            self.next.store((start + 1) % self.servers.len(), Ordering::Relaxed);
            Err(last.unwrap_or_else(|| WireError::ConnectionClosed("no servers reachable".into())))
        })
    }
}

impl fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnector")
            .field("servers", &self.servers)
            .field("timeout", &self.timeout)
            .finish()
    }
}
