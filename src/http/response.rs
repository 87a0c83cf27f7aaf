//! Response assembly.
//!
//! Wire format: `HTTP/1.1 <status>\r\n`, one `<Name>: <Value>\r\n` line per
//! header, a blank `\r\n`, then the body bytes verbatim. No framing is
//! added to application responses; the peer sees end of body when the
//! connection closes.

use crate::runtime::ResponseHead;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Protocol token written on every status line.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Default `Server` header value.
pub const SERVER_SOFTWARE: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp the way the `Date` header expects.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format(HTTP_DATE_FORMAT).to_string()
}

/// Total length of a chunked body.
pub fn body_len(body: &[Bytes]) -> usize {
    body.iter().map(Bytes::len).sum()
}

/// Assemble the outbound bytes for an application response.
///
/// `Date` and `Server` are appended after the application's own headers.
pub fn assemble(head: &ResponseHead, date: &str, server: &str, body: &[Bytes]) -> Bytes {
    let header_len: usize = head
        .headers
        .iter()
        .map(|(name, value)| name.len() + value.len() + 4)
        .sum();
    let mut out = BytesMut::with_capacity(
        HTTP_VERSION.len() + head.status.len() + header_len + 64 + body_len(body),
    );

    put_status_line(&mut out, &head.status);
    for (name, value) in &head.headers {
        put_header(&mut out, name, value);
    }
    put_header(&mut out, "Date", date);
    put_header(&mut out, "Server", server);
    out.put_slice(CRLF);
    for chunk in body {
        out.put_slice(chunk);
    }
    out.freeze()
}

/// A small plain-text response sent when a request is rejected before it
/// reaches the application. Unlike application responses it carries
/// `Content-Length` and `Connection: close`.
pub fn error_response(status: &str, date: &str, server: &str) -> Bytes {
    let body = format!("{status}\n");
    let head = ResponseHead {
        status: status.to_string(),
        headers: vec![
            (
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            ),
            ("Content-Length".to_string(), body.len().to_string()),
            ("Connection".to_string(), "close".to_string()),
        ],
    };
    assemble(&head, date, server, &[Bytes::from(body)])
}

fn put_status_line(out: &mut BytesMut, status: &str) {
    out.put_slice(HTTP_VERSION.as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.as_bytes());
    out.put_slice(CRLF);
}

fn put_header(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_http_date() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(http_date(ts), "Sat, 09 Mar 2024 07:05:01 GMT");
    }

    #[test]
    fn test_assemble_layout() {
        let head = ResponseHead {
            status: "200 OK".to_string(),
            headers: vec![(
                "Content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
        };
        let body = vec![Bytes::from_static(br#"{"status": 0}"#)];
        let out = assemble(&head, "Sat, 09 Mar 2024 07:05:01 GMT", "pollserve/test", &body);

        let expected = concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-type: text/plain; charset=utf-8\r\n",
            "Date: Sat, 09 Mar 2024 07:05:01 GMT\r\n",
            "Server: pollserve/test\r\n",
            "\r\n",
            "{\"status\": 0}",
        );
        assert_eq!(&out[..], expected.as_bytes());
    }

    #[test]
    fn test_body_chunks_concatenated() {
        let head = ResponseHead {
            status: "200 OK".to_string(),
            headers: Vec::new(),
        };
        let body = vec![
            Bytes::from_static(b"ab"),
            Bytes::new(),
            Bytes::from_static(b"cd"),
        ];
        assert_eq!(body_len(&body), 4);
        let out = assemble(&head, "d", "s", &body);
        assert!(out.ends_with(b"\r\n\r\nabcd"));
    }

    #[test]
    fn test_error_response_has_framing() {
        let out = error_response("400 Bad Request", "d", "s");
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Content-Length: 16\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n400 Bad Request\n"));
    }

    #[test]
    fn test_server_software() {
        assert!(SERVER_SOFTWARE.starts_with("pollserve/"));
    }
}
