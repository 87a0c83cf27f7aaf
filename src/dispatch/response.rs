//! View responses.

use crate::application::Body;
use bytes::Bytes;
use thiserror::Error;

const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Rejected status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("HTTP status code must be an integer from 100 to 599, got {0}")]
pub struct InvalidStatus(pub u16);

/// Response produced by a view or a short-circuiting middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    content: Bytes,
    status: u16,
    reason: Option<String>,
    content_type: String,
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    /// A `200` response with a plain-text content type.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            status: 200,
            reason: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            headers: Vec::new(),
        }
    }

    /// A `404` response.
    pub fn not_found(content: impl Into<Bytes>) -> Self {
        Self {
            status: 404,
            ..Self::new(content)
        }
    }

    /// A `500` response.
    pub fn server_error(content: impl Into<Bytes>) -> Self {
        Self {
            status: 500,
            ..Self::new(content)
        }
    }

    pub fn with_status(mut self, status: u16) -> Result<Self, InvalidStatus> {
        if !(100..=599).contains(&status) {
            return Err(InvalidStatus(status));
        }
        self.status = status;
        Ok(self)
    }

    /// Override the reason phrase looked up from the status code.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Add a header sent after `Content-Type`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn reason_phrase(&self) -> &str {
        match self.reason {
            Some(ref reason) => reason,
            None => reason_phrase(self.status).unwrap_or("Unknown Status Code"),
        }
    }

    /// Status line as handed to `start_response`, e.g. `"404 Not Found"`.
    pub fn status_line(&self) -> String {
        format!("{} {}", self.status, self.reason_phrase())
    }

    /// `Content-type` followed by any extra headers.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(1 + self.headers.len());
        headers.push(("Content-type".to_string(), self.content_type.clone()));
        headers.extend(self.headers.iter().cloned());
        headers
    }

    /// Body chunks for the server.
    pub fn render(self) -> Body {
        if self.content.is_empty() {
            Vec::new()
        } else {
            vec![self.content]
        }
    }
}

/// Standard reason phrase for `status`.
pub fn reason_phrase(status: u16) -> Option<&'static str> {
    let phrase = match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    };
    Some(phrase)
}
