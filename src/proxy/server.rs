//! Inspecting proxy server
//!
//! Accepts one client at a time and walks it through a fixed sequence:
//! rate check, single read, classification, then either the upload path or
//! keyword inspection followed by a verbatim relay. The client connection is
//! closed at the end of every iteration whatever the outcome. A slow client
//! or upstream stalls the whole proxy; there are no timeouts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::{Config, InspectionConfig, ProxyServerConfig};
use crate::error::{Result, TollgateError};
use crate::models::{EventKind, RawRequest};
use crate::proxy::inspector::{ContentInspector, RequestClass};
use crate::proxy::middleware::RateLimiter;
use crate::proxy::multipart::{MultipartForwarder, UploadSummary};
use crate::proxy::relay::{RelayStats, UpstreamRelay};
use crate::proxy::reporter::Reporter;
use crate::proxy::transport::UpstreamConnector;

/// Backlog requested from the OS, which clamps it to its own maximum
const LISTEN_BACKLOG: u32 = i32::MAX as u32;

/// Terminal state of one client connection
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// Too many arrivals inside the detection window
    RateLimited,
    /// The single read failed
    ReadFailed(TollgateError),
    /// The client sent nothing
    Empty,
    /// Keyword inspection matched
    Blocked { keyword: &'static str },
    /// Relayed verbatim
    Forwarded(RelayStats),
    /// Relay failed part way or before contacting the upstream
    RelayFailed(TollgateError),
    /// Upload split and forwarded part by part
    Uploaded(UploadSummary),
    /// Upload without a `boundary=` parameter; nothing forwarded
    UploadSkipped,
}

impl ConnectionOutcome {
    /// Whether anything reached the upstream
    pub fn contacted_upstream(&self) -> bool {
        match self {
            ConnectionOutcome::Forwarded(_) => true,
            ConnectionOutcome::Uploaded(summary) => summary.forwarded + summary.failed > 0,
            _ => false,
        }
    }
}

/// Inspecting reverse proxy
pub struct InspectingProxy {
    config: ProxyServerConfig,
    inspection: InspectionConfig,
    rate_limiter: RateLimiter,
    relay: Arc<UpstreamRelay>,
    forwarder: MultipartForwarder,
    reporter: Arc<dyn Reporter>,
}

impl InspectingProxy {
    /// Create a new proxy
    pub fn new(
        config: ProxyServerConfig,
        inspection: InspectionConfig,
        connector: Arc<dyn UpstreamConnector>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let relay = Arc::new(
            UpstreamRelay::new(connector, reporter.clone()).with_chunk_size(inspection.response_chunk),
        );
        let forwarder = MultipartForwarder::new(relay.clone(), reporter.clone())
            .with_boundary_width(inspection.boundary_width);

        Self {
            config,
            rate_limiter: RateLimiter::from_config(&inspection),
            inspection,
            relay,
            forwarder,
            reporter,
        }
    }

    pub fn from_config(
        config: &Config,
        connector: Arc<dyn UpstreamConnector>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self::new(
            config.proxy.clone(),
            config.inspection.clone(),
            connector,
            reporter,
        )
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Bind the listening socket on the configured loopback port
    ///
    /// Port 0 (or no port) asks the OS for an ephemeral one.
    pub fn bind(&self) -> Result<TcpListener> {
        let addr = SocketAddr::new(self.config.host, self.config.port.unwrap_or(0));
        let bind_err = |source: std::io::Error| TollgateError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;

        socket.bind(addr).map_err(bind_err)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_err)
    }

    /// Run the accept loop until shutdown or an accept failure
    ///
    /// Each client is fully handled before the next accept.
    #[instrument(skip_all)]
    pub async fn run(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let local_addr = listener.local_addr()?;
        self.reporter.emit(EventKind::ServerStarted {
            addr: local_addr.to_string(),
        });

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let outcome = self.serve_connection(stream, client_addr, Instant::now()).await;
                            debug!(client = %client_addr, ?outcome, "Connection closed");
                        }
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            return Err(TollgateError::Accept(e));
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Walk one client through rate check, read, inspection and forwarding
    ///
    /// The stream is shut down and dropped before returning.
    #[instrument(skip(self, stream, now))]
    pub async fn serve_connection<S>(
        &self,
        mut stream: S,
        client_addr: SocketAddr,
        now: Instant,
    ) -> ConnectionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let outcome = self.handle(&mut stream, client_addr, now).await;
        let _ = stream.shutdown().await;
        outcome
    }

    async fn handle<S>(&self, stream: &mut S, client_addr: SocketAddr, now: Instant) -> ConnectionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let client = client_addr.to_string();

        if self.rate_limiter.check(&client, now).is_err() {
            self.reporter.emit(EventKind::RateLimited { client });
            return ConnectionOutcome::RateLimited;
        }

        let request = match self.read_request(stream, &client).await {
            Ok(request) => request,
            Err(e @ TollgateError::EmptyRequest { .. }) => {
                debug!("{}", e);
                self.reporter.emit(EventKind::EmptyRequest { client });
                return ConnectionOutcome::Empty;
            }
            Err(e) => {
                self.reporter.emit(EventKind::ClientReadFailed {
                    client,
                    message: e.to_string(),
                });
                return ConnectionOutcome::ReadFailed(e);
            }
        };

        self.reporter.emit(EventKind::RequestReceived {
            client: client.clone(),
            text: request.text().into_owned(),
        });

        match ContentInspector::classify(request.as_bytes()) {
            RequestClass::Upload => self.upload_path(&request, stream, client).await,
            RequestClass::Plain => self.inspect_path(&request, stream, client).await,
        }
    }

    /// One receive of up to the read buffer; the rest of a longer request is ignored
    async fn read_request<S>(&self, stream: &mut S, client: &str) -> Result<RawRequest>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.inspection.read_buffer];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| TollgateError::ClientRead {
                client: client.to_string(),
                message: e.to_string(),
            })?;

        if n == 0 {
            return Err(TollgateError::EmptyRequest {
                client: client.to_string(),
            });
        }

        buf.truncate(n);
        Ok(RawRequest::new(buf))
    }

    async fn upload_path<S>(&self, request: &RawRequest, stream: &mut S, client: String) -> ConnectionOutcome
    where
        S: AsyncWrite + Unpin,
    {
        let Some(boundary) = self.forwarder.extract_boundary(request.as_bytes()) else {
            debug!("{}", TollgateError::MissingBoundary);
            self.reporter.emit(EventKind::UploadSkipped {
                client,
                reason: "no multipart boundary".to_string(),
            });
            return ConnectionOutcome::UploadSkipped;
        };

        let summary = self
            .forwarder
            .forward_upload(&client, request.as_bytes(), &boundary, stream)
            .await;
        ConnectionOutcome::Uploaded(summary)
    }

    async fn inspect_path<S>(&self, request: &RawRequest, stream: &mut S, client: String) -> ConnectionOutcome
    where
        S: AsyncWrite + Unpin,
    {
        if let Some(keyword) = ContentInspector::matched_keyword(request.as_bytes()) {
            let e = TollgateError::SuspiciousContent {
                client: client.clone(),
                keyword,
            };
            debug!("{}", e);
            self.reporter.emit(EventKind::SqlInjection {
                client,
                keyword: keyword.to_string(),
            });
            return ConnectionOutcome::Blocked { keyword };
        }

        match self.relay.relay(&client, request.as_bytes(), stream).await {
            Ok(stats) => ConnectionOutcome::Forwarded(stats),
            Err(e) => ConnectionOutcome::RelayFailed(e),
        }
    }
}
