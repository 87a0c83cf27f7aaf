//! Request description built from a buffered request head.
//!
//! Only the request line and header block are interpreted. The body is
//! whatever arrived after the header terminator before dispatch; nothing
//! more is read for it.

use crate::error::ProtocolError;
use bytes::Bytes;
use std::net::SocketAddr;

/// Parsed `METHOD target VERSION` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub query: String,
    pub protocol: String,
}

impl RequestLine {
    /// Parse a request line. Trailing `\r` is ignored.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(protocol), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ProtocolError::MalformedRequestLine(line.to_string()));
        };
        if !protocol.starts_with("HTTP/") {
            return Err(ProtocolError::MalformedRequestLine(line.to_string()));
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            query: query.to_string(),
            protocol: protocol.to_string(),
        })
    }
}

/// Name and port the server answers as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub name: String,
    pub port: u16,
}

/// The request-description mapping handed to the application.
#[derive(Debug, Clone)]
pub struct Environ {
    pub method: String,
    pub path: String,
    pub query: String,
    pub protocol: String,
    /// Lower-cased scheme from the protocol token, e.g. `http`.
    pub url_scheme: String,
    pub server_name: String,
    pub server_port: u16,
    pub remote_addr: Option<SocketAddr>,
    /// Request headers in arrival order, names as sent.
    pub headers: Vec<(String, String)>,
    /// Body bytes already buffered at dispatch time.
    pub body: Bytes,
    /// Requests are never handled on more than one thread.
    pub multithread: bool,
    /// Requests are never handled by more than one process.
    pub multiprocess: bool,
    /// The server handles many requests over its lifetime.
    pub run_once: bool,
    /// The body is not streamed in after dispatch.
    pub input_streaming: bool,
}

impl Environ {
    /// Build from a request head (request line plus headers, without the
    /// blank terminator line) and any buffered body bytes.
    pub fn parse(
        head: &[u8],
        body: &[u8],
        server: &ServerIdentity,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(head).map_err(|_| ProtocolError::InvalidEncoding)?;
        let mut lines = text.lines();
        let request_line = RequestLine::parse(lines.next().unwrap_or(""))?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ProtocolError::MalformedHeader(line.to_string()));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }

        let url_scheme = request_line
            .protocol
            .split('/')
            .next()
            .unwrap_or("http")
            .to_ascii_lowercase();

        Ok(Self {
            method: request_line.method,
            path: request_line.path,
            query: request_line.query,
            protocol: request_line.protocol,
            url_scheme,
            server_name: server.name.clone(),
            server_port: server.port,
            remote_addr,
            headers,
            body: Bytes::copy_from_slice(body),
            multithread: false,
            multiprocess: false,
            run_once: false,
            input_streaming: false,
        })
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Look up a variable by its CGI name.
    ///
    /// Headers are available as `HTTP_<NAME>` with `-` replaced by `_`;
    /// `Content-Type` and `Content-Length` also appear without the prefix.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "REQUEST_METHOD" => Some(self.method.clone()),
            "PATH_INFO" => Some(self.path.clone()),
            "QUERY_STRING" => Some(self.query.clone()),
            "SERVER_PROTOCOL" => Some(self.protocol.clone()),
            "SERVER_NAME" => Some(self.server_name.clone()),
            "SERVER_PORT" => Some(self.server_port.to_string()),
            "REMOTE_ADDR" => self.remote_addr.map(|a| a.ip().to_string()),
            "CONTENT_TYPE" => self.header("Content-Type").map(str::to_string),
            "CONTENT_LENGTH" => self.header("Content-Length").map(str::to_string),
            _ => {
                let name = key.strip_prefix("HTTP_")?;
                self.headers
                    .iter()
                    .find(|(n, _)| cgi_name(n) == name)
                    .map(|(_, v)| v.clone())
            }
        }
    }

    /// All variables under their CGI names.
    pub fn vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::with_capacity(8 + self.headers.len());
        for key in [
            "REQUEST_METHOD",
            "PATH_INFO",
            "QUERY_STRING",
            "SERVER_PROTOCOL",
            "SERVER_NAME",
            "SERVER_PORT",
            "REMOTE_ADDR",
            "CONTENT_TYPE",
            "CONTENT_LENGTH",
        ] {
            if let Some(value) = self.get(key) {
                vars.push((key.to_string(), value));
            }
        }
        for (name, value) in &self.headers {
            vars.push((format!("HTTP_{}", cgi_name(name)), value.clone()));
        }
        vars
    }

    #[cfg(test)]
    pub(crate) fn for_test(method: &str, target: &str) -> Self {
        let head = format!("{method} {target} HTTP/1.1\r\nHost: test\r\n");
        let server = ServerIdentity {
            name: "localhost".to_string(),
            port: 8000,
        };
        match Self::parse(head.as_bytes(), b"", &server, None) {
            Ok(environ) => environ,
            Err(e) => panic!("bad test request: {e}"),
        }
    }
}

fn cgi_name(header: &str) -> String {
    header.to_ascii_uppercase().replace('-', "_")
}
