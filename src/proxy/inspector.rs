//! Content inspection heuristics
//!
//! Keyword matching is ASCII case-insensitive and substring based, so a
//! keyword embedded in a larger word ("selection") still trips it.

use memchr::memmem;

/// Keywords that mark a request as SQL-injection-like
pub const SQL_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "alter", "truncate", "union", "join", "exec",
    "declare", "xp_",
];

const POST_TOKEN: &[u8] = b"POST";
const MULTIPART_TOKEN: &[u8] = b"multipart/form-data";

/// How a request is routed after inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Multipart file upload, re-encoded and forwarded part by part
    Upload,
    /// Anything else, scanned for keywords and relayed verbatim
    Plain,
}

/// Classifies raw request bytes
pub struct ContentInspector;

impl ContentInspector {
    /// Check if the request contains any SQL keyword
    pub fn is_suspicious(request: &[u8]) -> bool {
        Self::matched_keyword(request).is_some()
    }

    /// First SQL keyword found in the request, in keyword-list order
    pub fn matched_keyword(request: &[u8]) -> Option<&'static str> {
        let lowered = request.to_ascii_lowercase();

        SQL_KEYWORDS
            .iter()
            .copied()
            .find(|keyword| contains(&lowered, keyword.as_bytes()))
    }

    /// Check if the request is a multipart file upload
    ///
    /// Both tokens may appear anywhere in the buffer; the header section is
    /// not parsed.
    pub fn is_upload(request: &[u8]) -> bool {
        contains(request, POST_TOKEN) && contains(request, MULTIPART_TOKEN)
    }

    pub fn classify(request: &[u8]) -> RequestClass {
        if Self::is_upload(request) {
            RequestClass::Upload
        } else {
            RequestClass::Plain
        }
    }
}

/// Byte offset of the first occurrence of `needle` in `haystack`
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memmem::find(haystack, needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}
