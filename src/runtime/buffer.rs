//! Per-connection byte buffers.
//!
//! `InboundBuffer` accumulates request fragments as they arrive and scans
//! the whole accumulation for the header terminator. `OutboundBuffer`
//! holds an assembled response and tracks how much of it has been written.
//!
//! ## Terminator scan
//!
//! The terminator is the blank line after the request line and headers:
//! either `\n\r\n` (the tail of `\r\n\r\n`) or a bare `\n\n`. Scanning is
//! incremental: each append resumes a few bytes before the previous end so
//! a terminator split across fragments is still found, and the result is
//! identical to scanning the full buffer from the start.

use bytes::{Buf, Bytes, BytesMut};

/// Accumulated request bytes for one connection.
#[derive(Debug)]
pub struct InboundBuffer {
    data: BytesMut,
    /// Number of fragments appended so far.
    fragments: usize,
    /// Offset where the next terminator scan starts.
    scan_from: usize,
    /// Byte range of the terminator once found: (head_end, body_start).
    terminator: Option<(usize, usize)>,
}

impl InboundBuffer {
    /// Create an empty buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            fragments: 0,
            scan_from: 0,
            terminator: None,
        }
    }

    /// Append one received fragment.
    ///
    /// Returns `true` if the header terminator is present in the
    /// accumulated bytes after this append.
    pub fn push(&mut self, fragment: &[u8]) -> bool {
        if fragment.is_empty() {
            return self.terminator.is_some();
        }
        self.data.extend_from_slice(fragment);
        self.fragments += 1;
        if self.terminator.is_none() {
            self.scan();
        }
        self.terminator.is_some()
    }

    fn scan(&mut self) {
        let data = &self.data[..];
        let mut i = self.scan_from;
        while i < data.len() {
            if data[i] == b'\n' {
                if data.get(i + 1) == Some(&b'\n') {
                    self.terminator = Some((i + 1, i + 2));
                    return;
                }
                if data.get(i + 1) == Some(&b'\r') && data.get(i + 2) == Some(&b'\n') {
                    self.terminator = Some((i + 1, i + 3));
                    return;
                }
            }
            i += 1;
        }
        // A partial terminator may span the next fragment boundary.
        self.scan_from = data.len().saturating_sub(2);
    }

    /// Whether the header terminator has been seen.
    pub fn is_complete(&self) -> bool {
        self.terminator.is_some()
    }

    /// Request line and headers, without the terminating blank line.
    ///
    /// `None` until the terminator has been found.
    pub fn head(&self) -> Option<&[u8]> {
        self.terminator.map(|(head_end, _)| &self.data[..head_end])
    }

    /// Bytes buffered after the terminator.
    pub fn body(&self) -> &[u8] {
        match self.terminator {
            Some((_, body_start)) => &self.data[body_start..],
            None => &[],
        }
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of fragments appended.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// All buffered bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Response bytes waiting to be written to the peer.
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    data: Bytes,
    /// Bytes already written.
    written: usize,
}

impl OutboundBuffer {
    /// Load an assembled response, replacing any previous contents.
    pub fn fill(&mut self, data: Bytes) {
        self.data = data;
        self.written = 0;
    }

    /// Bytes not yet written.
    pub fn remaining(&self) -> &[u8] {
        self.data.chunk()
    }

    /// Number of bytes not yet written.
    pub fn remaining_len(&self) -> usize {
        self.data.remaining()
    }

    /// Total bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Trim `n` written bytes from the front.
    ///
    /// # Panics
    /// Panics if `n` exceeds the remaining length.
    pub fn advance(&mut self, n: usize) {
        self.data.advance(n);
        self.written += n;
    }

    /// Check if everything has been written.
    pub fn is_drained(&self) -> bool {
        !self.data.has_remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_in_single_fragment() {
        let mut buf = InboundBuffer::with_capacity(64);
        assert!(buf.push(b"GET / HTTP/1.1\r\nHost: a\r\n\r\nbody"));
        assert_eq!(buf.head(), Some(&b"GET / HTTP/1.1\r\nHost: a\r\n"[..]));
        assert_eq!(buf.body(), b"body");
    }

    #[test]
    fn test_terminator_split_across_fragments() {
        let mut buf = InboundBuffer::with_capacity(64);
        assert!(!buf.push(b"GET /test?x=1 HTTP/1.1\r\nHost: a\r"));
        assert!(!buf.push(b"\n"));
        assert!(!buf.push(b"\r"));
        assert!(buf.push(b"\n"));
        assert_eq!(buf.fragments(), 4);
        assert!(buf.body().is_empty());
    }

    #[test]
    fn test_terminator_beyond_second_fragment() {
        let mut buf = InboundBuffer::with_capacity(64);
        buf.push(b"GET / HTTP/1.1\r\n");
        buf.push(b"Host: a\r\n");
        buf.push(b"Accept: */*\r\n");
        assert!(!buf.is_complete());
        assert!(buf.push(b"\r\n"));
        assert_eq!(buf.fragments(), 4);
    }

    #[test]
    fn test_bare_newline_terminator() {
        let mut buf = InboundBuffer::with_capacity(16);
        assert!(buf.push(b"GET / HTTP/1.0\n\nrest"));
        assert_eq!(buf.head(), Some(&b"GET / HTTP/1.0\n"[..]));
        assert_eq!(buf.body(), b"rest");
    }

    #[test]
    fn test_incremental_scan_matches_full_scan() {
        let request = b"POST /submit HTTP/1.1\r\nHost: example\r\nX: y\r\n\r\nhello";
        let mut whole = InboundBuffer::with_capacity(128);
        whole.push(request);

        for split in 1..request.len() {
            let mut parts = InboundBuffer::with_capacity(128);
            parts.push(&request[..split]);
            parts.push(&request[split..]);
            assert_eq!(parts.head(), whole.head(), "split at {split}");
            assert_eq!(parts.body(), whole.body(), "split at {split}");
        }
    }

    #[test]
    fn test_empty_fragment_ignored() {
        let mut buf = InboundBuffer::with_capacity(16);
        assert!(!buf.push(b""));
        assert!(buf.is_empty());
        assert_eq!(buf.fragments(), 0);
    }

    #[test]
    fn test_outbound_drains() {
        let mut out = OutboundBuffer::default();
        assert!(out.is_drained());

        out.fill(Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\n"));
        assert_eq!(out.remaining_len(), 19);

        out.advance(9);
        assert_eq!(out.remaining(), b"200 OK\r\n\r\n");
        assert_eq!(out.written(), 9);
        assert_eq!(out.remaining_len(), 10);

        out.advance(10);
        assert!(out.is_drained());
        assert_eq!(out.written(), 19);
    }
}
