//! Multipart file-upload forwarding
//!
//! Upload requests are not relayed verbatim. The boundary is pulled out of
//! the raw request with a fixed-width heuristic, the buffer is split on it,
//! and every part that names a file is re-packaged as its own minimal
//! `POST /upload` request and sent through the upstream relay.
//!
//! The boundary heuristic takes a fixed number of bytes after `boundary=`
//! and is not delimiter-aware: whatever follows the parameter inside that
//! width becomes part of the token, and longer boundaries are truncated.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWrite;
use tracing::{debug, instrument};

use crate::config::BOUNDARY_WIDTH;
use crate::error::Result;
use crate::models::EventKind;
use crate::proxy::inspector::find;
use crate::proxy::relay::UpstreamRelay;
use crate::proxy::reporter::Reporter;

const BOUNDARY_PARAM: &[u8] = b"boundary=";
const FORM_DATA_MARKER: &[u8] = b"Content-Disposition: form-data;";
const FILENAME_PARAM: &[u8] = b"filename=\"";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Part delimiter extracted from a request, already prefixed with `--`
///
/// Raw bytes; the width cut may land inside a multibyte character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBoundary(Bytes);

impl MultipartBoundary {
    /// Take up to `width` bytes after the first `boundary=` in `raw`
    pub fn extract(raw: &[u8], width: usize) -> Option<Self> {
        let start = find(raw, BOUNDARY_PARAM)? + BOUNDARY_PARAM.len();
        let end = start.saturating_add(width).min(raw.len());
        Some(Self::from_token(&raw[start..end]))
    }

    /// Build a delimiter from a bare token
    pub fn from_token(token: &[u8]) -> Self {
        let mut delimiter = BytesMut::with_capacity(token.len() + 2);
        delimiter.put_slice(b"--");
        delimiter.put_slice(token);
        Self(delimiter.freeze())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MultipartBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Split `body` on every occurrence of `boundary`
///
/// Each returned range covers the bytes before one boundary occurrence,
/// starting right after the previous one. Bytes after the last occurrence
/// are not returned. Order is preserved.
pub fn split_parts(body: &[u8], boundary: &MultipartBoundary) -> Vec<Range<usize>> {
    let delimiter = boundary.as_bytes();
    let mut parts = Vec::new();
    if delimiter.is_empty() {
        return parts;
    }

    let mut offset = 0;
    while let Some(pos) = find(&body[offset..], delimiter) {
        parts.push(offset..offset + pos);
        offset += pos + delimiter.len();
    }

    parts
}

/// A file carried by one multipart part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Filename bytes exactly as sent
    pub filename: Bytes,
    /// Content range relative to the part
    pub content: Range<usize>,
}

impl FilePart {
    /// Recognize a form-data part that names a file
    ///
    /// Returns `None` for parts without the form-data header or without a
    /// `filename="` parameter. A filename missing its closing quote runs to
    /// the end of the part. Content starts after the first blank line and is
    /// empty when there is none.
    pub fn parse(part: &[u8]) -> Option<Self> {
        find(part, FORM_DATA_MARKER)?;

        let name_start = find(part, FILENAME_PARAM)? + FILENAME_PARAM.len();
        let name_end = find(&part[name_start..], b"\"")
            .map(|pos| name_start + pos)
            .unwrap_or(part.len());
        let filename = Bytes::copy_from_slice(&part[name_start..name_end]);

        let content = match find(part, HEADER_TERMINATOR) {
            Some(pos) => pos + HEADER_TERMINATOR.len()..part.len(),
            None => part.len()..part.len(),
        };

        Some(Self { filename, content })
    }

    pub fn content<'a>(&self, part: &'a [u8]) -> &'a [u8] {
        &part[self.content.clone()]
    }

    /// Filename for display; invalid UTF-8 is replaced
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.filename).into_owned()
    }
}

/// Build the synthetic single-file upload request
///
/// Boundary, filename and content are copied byte for byte.
pub fn build_upload_request(boundary: &MultipartBoundary, filename: &[u8], content: &[u8]) -> Vec<u8> {
    let boundary = boundary.as_bytes();
    let mut request = Vec::with_capacity(160 + 2 * boundary.len() + filename.len() + content.len());

    request.extend_from_slice(b"POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=");
    request.extend_from_slice(boundary);
    request.extend_from_slice(b"\r\nContent-Disposition: form-data; name=\"file\"; filename=\"");
    request.extend_from_slice(filename);
    request.extend_from_slice(b"\"\r\n\r\n");
    request.extend_from_slice(content);
    request.extend_from_slice(b"\r\n--");
    request.extend_from_slice(boundary);
    request.extend_from_slice(b"--\r\n");
    request
}

/// Tally of one upload request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Parts found between boundaries
    pub parts: usize,
    /// Parts that named a file and were sent upstream
    pub forwarded: usize,
    /// Forwarding attempts that failed
    pub failed: usize,
}

/// Re-packages multipart uploads for the upstream
pub struct MultipartForwarder {
    relay: Arc<UpstreamRelay>,
    reporter: Arc<dyn Reporter>,
    boundary_width: usize,
}

impl MultipartForwarder {
    pub fn new(relay: Arc<UpstreamRelay>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            relay,
            reporter,
            boundary_width: BOUNDARY_WIDTH,
        }
    }

    pub fn with_boundary_width(mut self, width: usize) -> Self {
        self.boundary_width = width;
        self
    }

    pub fn extract_boundary(&self, raw: &[u8]) -> Option<MultipartBoundary> {
        MultipartBoundary::extract(raw, self.boundary_width)
    }

    /// Forward one part if it carries a file
    ///
    /// Returns `Ok(false)` when the part is skipped.
    pub async fn forward_part<W>(
        &self,
        peer: &str,
        part: &[u8],
        boundary: &MultipartBoundary,
        client: &mut W,
    ) -> Result<bool>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Some(file) = FilePart::parse(part) else {
            debug!("Skipping multipart part without a filename");
            return Ok(false);
        };

        let content = file.content(part);
        let request = build_upload_request(boundary, &file.filename, content);
        self.relay.relay(peer, &request, client).await?;

        self.reporter.emit(EventKind::UploadPartForwarded {
            client: peer.to_string(),
            filename: file.display_name(),
            bytes: content.len(),
        });
        Ok(true)
    }

    /// Split `body` on `boundary` and forward every file part
    ///
    /// Failures of individual parts are already reported by the relay and
    /// only counted here.
    #[instrument(skip_all, fields(peer = %peer, boundary = %boundary))]
    pub async fn forward_upload<W>(
        &self,
        peer: &str,
        body: &[u8],
        boundary: &MultipartBoundary,
        client: &mut W,
    ) -> UploadSummary
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let ranges = split_parts(body, boundary);
        let mut summary = UploadSummary {
            parts: ranges.len(),
            ..UploadSummary::default()
        };

        for range in ranges {
            match self.forward_part(peer, &body[range], boundary, client).await {
                Ok(true) => summary.forwarded += 1,
                Ok(false) => {}
                Err(e) => {
                    debug!("Upload part not forwarded: {}", e);
                    summary.failed += 1;
                }
            }
        }

        debug!(
            parts = summary.parts,
            forwarded = summary.forwarded,
            failed = summary.failed,
            "Upload handled"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::relay::tests::{spawn_upstream, FakeConnector};
    use crate::proxy::reporter::BroadcastReporter;

    const PEER: &str = "127.0.0.1:40000";

    fn boundary(token: &str) -> MultipartBoundary {
        MultipartBoundary::from_token(token.as_bytes())
    }

    #[test]
    fn test_extract_boundary_at_end_of_buffer() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XYZ123";
        let boundary = MultipartBoundary::extract(raw, BOUNDARY_WIDTH).unwrap();
        assert_eq!(boundary.as_bytes(), b"--XYZ123");
    }

    #[test]
    fn test_extract_boundary_is_fixed_width() {
        let mut raw = b"Content-Type: multipart/form-data; boundary=".to_vec();
        raw.extend(std::iter::repeat(b'a').take(100));

        let boundary = MultipartBoundary::extract(&raw, BOUNDARY_WIDTH).unwrap();
        assert_eq!(boundary.len(), 2 + BOUNDARY_WIDTH);
        assert_eq!(boundary.to_string(), format!("--{}", "a".repeat(70)));
    }

    #[test]
    fn test_extract_boundary_takes_trailing_bytes() {
        let raw = b"boundary=AB\r\n\r\nbody";
        let boundary = MultipartBoundary::extract(raw, 6).unwrap();
        assert_eq!(boundary.as_bytes(), b"--AB\r\n\r\n");
    }

    #[test]
    fn test_extract_boundary_keeps_bytes_cut_at_window_edge() {
        // 69 ASCII bytes then a two-byte character: the cut keeps only its lead byte
        let mut token = vec![b'A'; 69];
        token.extend_from_slice("é".as_bytes());

        let mut raw = b"--".to_vec();
        raw.extend_from_slice(&token);
        raw.extend_from_slice(b"\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a\"\r\n\r\nA\r\n--");
        raw.extend_from_slice(&token);
        raw.extend_from_slice(b"--\r\nContent-Type: multipart/form-data; boundary=");
        raw.extend_from_slice(&token);

        let boundary = MultipartBoundary::extract(&raw, BOUNDARY_WIDTH).unwrap();
        assert_eq!(boundary.len(), 2 + BOUNDARY_WIDTH);
        assert_eq!(&boundary.as_bytes()[2..], &token[..BOUNDARY_WIDTH]);
        assert_eq!(boundary.as_bytes().last(), Some(&0xC3));

        let parts = split_parts(&raw, &boundary);
        assert_eq!(parts.len(), 2);
        let file = FilePart::parse(&raw[parts[1].clone()]).unwrap();
        assert_eq!(file.filename, Bytes::from_static(b"a"));
    }

    #[test]
    fn test_extract_boundary_missing() {
        assert!(MultipartBoundary::extract(b"POST / HTTP/1.1\r\n\r\n", BOUNDARY_WIDTH).is_none());
    }

    #[test]
    fn test_split_parts_preserves_order() {
        let body = b"preamble--Bfirst--Bsecond--Btail";
        let parts = split_parts(body, &boundary("B"));

        let slices: Vec<&[u8]> = parts.iter().map(|r| &body[r.clone()]).collect();
        assert_eq!(slices, vec![&b"preamble"[..], b"first", b"second"]);
    }

    #[test]
    fn test_split_parts_without_boundary() {
        assert!(split_parts(b"no delimiters here", &boundary("B")).is_empty());
    }

    #[test]
    fn test_split_then_rejoin_reproduces_body() {
        let body = b"head\r\n--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XYZ\r\nContent-Disposition: form-data; name=\"b\"; filename=\"b.txt\"\r\n\r\nhello\r\n--XYZ--\r\n";
        let delimiter = boundary("XYZ");
        let parts = split_parts(body, &delimiter);
        assert_eq!(parts.len(), 3);

        let tail_start = parts.last().unwrap().end + delimiter.len();
        let mut rejoined = Vec::new();
        for range in &parts {
            rejoined.extend_from_slice(&body[range.clone()]);
            rejoined.extend_from_slice(delimiter.as_bytes());
        }
        rejoined.extend_from_slice(&body[tail_start..]);

        assert_eq!(rejoined, body.to_vec());
    }

    #[test]
    fn test_file_part_parse() {
        let part = b"\r\nContent-Disposition: form-data; name=\"file\"; filename=\"report.csv\"\r\nContent-Type: text/csv\r\n\r\na,b\r\n1,2\r\n";
        let file = FilePart::parse(part).unwrap();

        assert_eq!(file.filename, Bytes::from_static(b"report.csv"));
        assert_eq!(file.display_name(), "report.csv");
        assert_eq!(file.content(part), b"a,b\r\n1,2\r\n");
    }

    #[test]
    fn test_file_part_without_filename_is_skipped() {
        let part = b"\r\nContent-Disposition: form-data; name=\"comment\"\r\n\r\nhi\r\n";
        assert!(FilePart::parse(part).is_none());
        assert!(FilePart::parse(b"\r\nContent-Type: text/plain\r\n\r\nfilename=\"x\"").is_none());
    }

    #[test]
    fn test_file_part_edge_cases() {
        let unterminated = b"Content-Disposition: form-data; filename=\"open";
        let file = FilePart::parse(unterminated).unwrap();
        assert_eq!(file.filename, Bytes::from_static(b"open"));
        assert!(file.content(unterminated).is_empty());
    }

    #[test]
    fn test_build_upload_request() {
        let request = build_upload_request(&boundary("XYZ"), b"a.txt", b"data");
        assert_eq!(
            request,
            b"POST /upload HTTP/1.1\r\n\
              Content-Type: multipart/form-data; boundary=--XYZ\r\n\
              Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
              \r\n\
              data\r\n\
              ----XYZ--\r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_non_utf8_filename_is_forwarded_verbatim() {
        let part = b"\r\nContent-Disposition: form-data; name=\"f\"; filename=\"r\xE9sum\xE9.txt\"\r\n\r\ncv\r\n";
        let file = FilePart::parse(part).unwrap();
        assert_eq!(file.filename, Bytes::from_static(b"r\xE9sum\xE9.txt"));

        let request = build_upload_request(&boundary("XYZ"), &file.filename, file.content(part));
        assert!(find(&request, b"filename=\"r\xE9sum\xE9.txt\"\r\n").is_some());
        assert!(find(&request, "\u{FFFD}".as_bytes()).is_none());
    }

    #[tokio::test]
    async fn test_forward_upload_sends_each_file_part() {
        let (first_proxy, first_upstream) = tokio::io::duplex(8192);
        let (second_proxy, second_upstream) = tokio::io::duplex(8192);
        let first = spawn_upstream(first_upstream, b"HTTP/1.1 201 Created\r\n\r\n");
        let second = spawn_upstream(second_upstream, b"HTTP/1.1 201 Created\r\n\r\n");

        let reporter = Arc::new(BroadcastReporter::new(64));
        let mut rx = reporter.subscribe();
        let connector = Arc::new(FakeConnector::new(vec![first_proxy, second_proxy]));
        let relay = Arc::new(UpstreamRelay::new(connector.clone(), reporter.clone()));
        let forwarder = MultipartForwarder::new(relay, reporter);

        let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nskip me\r\n--XYZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"one.txt\"\r\n\r\nONE\r\n--XYZ\r\nContent-Disposition: form-data; name=\"g\"; filename=\"two.bin\"\r\n\r\nTWO\r\n--XYZ--\r\n";

        let mut client = Vec::new();
        let summary = forwarder
            .forward_upload(PEER, body, &boundary("XYZ"), &mut client)
            .await;

        assert_eq!(
            summary,
            UploadSummary {
                parts: 4,
                forwarded: 2,
                failed: 0,
            }
        );
        assert_eq!(connector.remaining(), 0);

        let first_request = String::from_utf8(first.await.unwrap()).unwrap();
        assert!(first_request.starts_with("POST /upload HTTP/1.1\r\n"));
        assert!(first_request.contains("filename=\"one.txt\""));
        assert!(first_request.ends_with("ONE\r\n\r\n----XYZ--\r\n"));

        let second_request = String::from_utf8(second.await.unwrap()).unwrap();
        assert!(second_request.contains("filename=\"two.bin\""));

        assert_eq!(
            client,
            b"HTTP/1.1 201 Created\r\n\r\nHTTP/1.1 201 Created\r\n\r\n".to_vec()
        );

        let mut forwarded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EventKind::UploadPartForwarded { client, filename, .. } = event.kind {
                assert_eq!(client, PEER);
                forwarded.push(filename);
            }
        }
        assert_eq!(forwarded, vec!["one.txt".to_string(), "two.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_forward_upload_counts_failed_parts() {
        let reporter = Arc::new(BroadcastReporter::new(16));
        let relay = Arc::new(UpstreamRelay::new(
            Arc::new(FakeConnector::empty()),
            reporter.clone(),
        ));
        let forwarder = MultipartForwarder::new(relay, reporter);

        let body = b"--B\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x\"\r\n\r\nX\r\n--B--";
        let mut client = Vec::new();
        let summary = forwarder.forward_upload(PEER, body, &boundary("B"), &mut client).await;

        assert_eq!(summary.forwarded, 0);
        assert_eq!(summary.failed, 1);
        assert!(client.is_empty());
    }
}
