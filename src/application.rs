//! The application boundary.
//!
//! An application receives the request description and a
//! [`StartResponse`] recorder, calls [`StartResponse::start`] exactly once
//! with a status line and header list, and returns the body as a sequence
//! of byte chunks.
//!
//! ```
//! use bytes::Bytes;
//! use pollserve::{AppResult, Environ, StartResponse};
//!
//! fn hello(_environ: &Environ, start: &mut StartResponse) -> AppResult {
//!     start.start("200 OK", vec![("Content-Type".into(), "text/plain".into())]);
//!     Ok(vec![Bytes::from_static(b"hello")])
//! }
//! ```

use crate::error::ApplicationError;
use crate::http::Environ;
use crate::runtime::ResponseHead;
use bytes::Bytes;

/// Response body as returned by an application.
pub type Body = Vec<Bytes>;

/// What an application returns.
pub type AppResult = Result<Body, Box<dyn std::error::Error + Send + Sync>>;

/// A request-handling callable.
pub trait Application {
    fn call(&mut self, environ: &Environ, start: &mut StartResponse) -> AppResult;
}

impl<F> Application for F
where
    F: FnMut(&Environ, &mut StartResponse) -> AppResult,
{
    fn call(&mut self, environ: &Environ, start: &mut StartResponse) -> AppResult {
        self(environ, start)
    }
}

/// Records the status line and headers an application starts its
/// response with.
#[derive(Debug, Default)]
pub struct StartResponse {
    head: Option<ResponseHead>,
    calls: usize,
}

impl StartResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the response status (e.g. `"200 OK"`) and headers.
    ///
    /// Only the first call is recorded; later calls are counted and
    /// reported as a contract violation once the application returns.
    pub fn start(&mut self, status: impl Into<String>, headers: Vec<(String, String)>) {
        self.calls += 1;
        if self.head.is_none() {
            self.head = Some(ResponseHead {
                status: status.into(),
                headers,
            });
        }
    }

    /// Number of times [`start`](Self::start) was called.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Check the exactly-once contract and hand back the recorded head.
    pub fn finish(self) -> Result<ResponseHead, ApplicationError> {
        match (self.calls, self.head) {
            (1, Some(head)) => Ok(head),
            (0, _) | (_, None) => Err(ApplicationError::NotStarted),
            (calls, Some(_)) => Err(ApplicationError::StartedTwice { calls }),
        }
    }
}
