use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

/// Raw bytes of one client request, captured by a single read
///
/// Never mutated after capture. Requests longer than the read buffer are
/// truncated at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    bytes: Bytes,
}

impl RawRequest {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy text rendering for the console
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl AsRef<[u8]> for RawRequest {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
