//! HTTP/1.x framing.
//!
//! - `environ`: request line and header parsing into an [`Environ`]
//! - `response`: status line, header and body assembly

pub mod environ;
pub mod response;

pub use environ::{Environ, RequestLine, ServerIdentity};
