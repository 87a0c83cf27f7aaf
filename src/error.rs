//! Error taxonomy for the connection server.
//!
//! Transport failures close the affected connection. Protocol and
//! application failures close the connection too, and additionally
//! surface at the event loop's dispatch site where they are logged.

use crate::runtime::ConnState;
use mio::Token;
use std::io;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while driving connections.
#[derive(Debug, Error)]
pub enum Error {
    /// A non-blocking socket operation failed or observed disconnection.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The buffered request could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The application raised or broke the response-start contract.
    #[error("application error: {0}")]
    Application(#[from] ApplicationError),

    /// A token was registered twice with the event loop.
    #[error("{0:?} is already registered")]
    AlreadyRegistered(Token),

    /// An operation referenced a token the event loop does not know.
    #[error("{0:?} is not registered")]
    NotRegistered(Token),

    /// A connection was asked to make an illegal state transition.
    #[error("invalid connection transition from {from:?} to {to:?}")]
    InvalidTransition { from: ConnState, to: ConnState },

    /// The listening socket could not be set up.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True for failures that only concern the peer's socket.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Malformed request input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,

    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
}

/// Failures attributable to the application callable.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("application failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("application panicked: {0}")]
    Panicked(String),

    #[error("application returned without calling start_response")]
    NotStarted,

    #[error("application called start_response {calls} times")]
    StartedTwice { calls: usize },
}
