//! Upstream relay
//!
//! Sends one payload to the upstream and streams the response back to the
//! client chunk by chunk as it arrives, without buffering the whole body.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::config::RESPONSE_CHUNK;
use crate::error::{Result, TollgateError};
use crate::models::{EventKind, RelayStage};
use crate::proxy::reporter::Reporter;
use crate::proxy::transport::UpstreamConnector;

/// Byte counts for one relayed exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_sent: usize,
    pub bytes_received: usize,
    pub chunks: usize,
}

/// Forwards payloads to the upstream destination
pub struct UpstreamRelay {
    connector: Arc<dyn UpstreamConnector>,
    reporter: Arc<dyn Reporter>,
    chunk_size: usize,
}

impl UpstreamRelay {
    pub fn new(connector: Arc<dyn UpstreamConnector>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            connector,
            reporter,
            chunk_size: RESPONSE_CHUNK,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Send `payload` upstream and stream the response to `client`
    ///
    /// `peer` is the client's `address:port`, used to tag failure reports.
    /// A new upstream connection is opened for every call. Any failure is
    /// reported and returned; chunks already forwarded stay with the client.
    #[instrument(skip_all, fields(peer = %peer, upstream = %self.connector.destination(), payload_len = payload.len()))]
    pub async fn relay<W>(&self, peer: &str, payload: &[u8], client: &mut W) -> Result<RelayStats>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let result = self.exchange(payload, client).await;

        if let Err((stage, e)) = &result {
            self.reporter.emit(EventKind::UpstreamFailure {
                client: peer.to_string(),
                stage: *stage,
                message: e.to_string(),
            });
        }

        result.map_err(|(_, e)| e)
    }

    async fn exchange<W>(
        &self,
        payload: &[u8],
        client: &mut W,
    ) -> std::result::Result<RelayStats, (RelayStage, TollgateError)>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut upstream = self
            .connector
            .connect()
            .await
            .map_err(|e| (RelayStage::Connect, e))?;

        upstream.write_all(payload).await.map_err(|e| {
            (
                RelayStage::Send,
                TollgateError::UpstreamSend(e.to_string()),
            )
        })?;
        upstream.flush().await.map_err(|e| {
            (
                RelayStage::Send,
                TollgateError::UpstreamSend(e.to_string()),
            )
        })?;

        let mut stats = RelayStats {
            bytes_sent: payload.len(),
            ..RelayStats::default()
        };
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = upstream.read(&mut buf).await.map_err(|e| {
                (
                    RelayStage::Receive,
                    TollgateError::UpstreamReceive(e.to_string()),
                )
            })?;

            if n == 0 {
                break;
            }

            let chunk = &buf[..n];
            self.reporter.emit(EventKind::ResponseChunk {
                text: String::from_utf8_lossy(chunk).into_owned(),
                bytes: n,
            });

            client.write_all(chunk).await.map_err(|e| {
                (
                    RelayStage::ForwardToClient,
                    TollgateError::ClientWrite(e.to_string()),
                )
            })?;

            stats.bytes_received += n;
            stats.chunks += 1;
        }

        client.flush().await.map_err(|e| {
            (
                RelayStage::ForwardToClient,
                TollgateError::ClientWrite(e.to_string()),
            )
        })?;

        debug!(
            bytes_sent = stats.bytes_sent,
            bytes_received = stats.bytes_received,
            chunks = stats.chunks,
            "Upstream exchange complete"
        );

        Ok(stats)
    }
}
