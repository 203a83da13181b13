//! Upstream transport layer
//!
//! Opens byte-stream connections to the fixed upstream destination. A fresh
//! connection is made for every exchange; nothing is pooled.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::config::UpstreamDestination;
use crate::error::{Result, TollgateError};

/// Trait for upstream connections
pub trait UpstreamConnection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> UpstreamConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens connections to the upstream destination
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a new connection
    async fn connect(&self) -> Result<Box<dyn UpstreamConnection>>;

    /// Where connections go
    fn destination(&self) -> UpstreamDestination;
}

/// Plain TCP connector
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    destination: UpstreamDestination,
}

impl TcpConnector {
    pub fn new(destination: UpstreamDestination) -> Self {
        Self { destination }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(UpstreamDestination::default())
    }
}

#[async_trait]
impl UpstreamConnector for TcpConnector {
    #[instrument(skip(self), fields(upstream = %self.destination))]
    async fn connect(&self) -> Result<Box<dyn UpstreamConnection>> {
        let addr = self.destination.socket_addr();
        debug!("Connecting to upstream at {}", addr);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TollgateError::UpstreamConnect {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        debug!("Upstream connection established");
        Ok(Box::new(stream))
    }

    fn destination(&self) -> UpstreamDestination {
        self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector_reaches_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let connector = TcpConnector::new(UpstreamDestination::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        ));
        let mut conn = connector.connect().await.unwrap();
        conn.write_all(b"ping").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ping");
        assert_eq!(connector.destination().port, port);
    }

    #[tokio::test]
    async fn test_tcp_connector_reports_refused_connection() {
        // Grab a free port, then close it so nothing listens there
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let connector = TcpConnector::new(UpstreamDestination::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        ));

        let err = match connector.connect().await {
            Ok(_) => panic!("connect to a closed port succeeded"),
            Err(e) => e,
        };
        assert!(matches!(err, TollgateError::UpstreamConnect { .. }));
    }

    #[test]
    fn test_default_connector_targets_fixed_upstream() {
        let connector = TcpConnector::default();
        assert_eq!(connector.destination().to_string(), "127.0.0.1:5002");
    }
}
