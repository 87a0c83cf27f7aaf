//! pollserve: a single-threaded, readiness-driven HTTP server
//!
//! One event loop multiplexes the listening socket and every client
//! connection. Each connection:
//! - accumulates its request head across as many reads as it takes
//! - hands the parsed request to an [`Application`] exactly once
//! - writes the response back and closes
//!
//! Applications follow a start-response protocol: they record a status
//! line and headers through [`StartResponse`] and return the body as byte
//! chunks. The server adds `Date` and `Server` headers.

pub mod application;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod runtime;
pub mod server;

pub use application::{AppResult, Application, Body, StartResponse};
pub use config::Config;
pub use error::{Error, Result};
pub use http::Environ;
pub use runtime::EventLoop;
pub use server::Server;
