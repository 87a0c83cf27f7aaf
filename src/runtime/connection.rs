//! Connection state machine for managing TCP connections.
//!
//! Each connection owns its socket, its request and response buffers and
//! a tagged state. Transitions are checked: a connection cannot start
//! writing before its request head is complete, and nothing leaves
//! `Closed`.

use crate::error::{Error, Result};
use crate::runtime::buffer::{InboundBuffer, OutboundBuffer};
use bytes::Bytes;
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted but not yet registered with the event loop.
    Accepting,
    /// Accumulating request bytes until the header terminator arrives.
    Reading,
    /// Request head complete; building and draining the response.
    Writing,
    /// Socket closed and unregistered.
    Closed,
}

/// Status line and headers recorded by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Numeric part of the status line, e.g. `"200"` for `"200 OK"`.
    pub fn code(&self) -> &str {
        self.status.split_whitespace().next().unwrap_or("")
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    /// Socket for this peer.
    pub stream: TcpStream,
    /// Remote address captured at accept time.
    pub peer: SocketAddr,
    /// Received request bytes.
    pub inbound: InboundBuffer,
    /// Response bytes still to be written.
    pub outbound: OutboundBuffer,
    /// Set once the response has been built.
    pub dispatched: bool,
    /// Recorded by the application's start_response call.
    pub response: Option<ResponseHead>,
    /// Method and path, kept for the access log.
    pub request_line: Option<(String, String)>,
    state: ConnState,
    accepted_at: Instant,
}

impl Connection {
    /// Create a new connection in the accepting state.
    pub fn new(stream: TcpStream, peer: SocketAddr, read_capacity: usize) -> Self {
        Self {
            stream,
            peer,
            inbound: InboundBuffer::with_capacity(read_capacity),
            outbound: OutboundBuffer::default(),
            dispatched: false,
            response: None,
            request_line: None,
            state: ConnState::Accepting,
            accepted_at: Instant::now(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Whether the connection has outlived `timeout` without finishing.
    pub fn is_expired(&self, timeout: Duration, now: Instant) -> bool {
        self.state != ConnState::Closed && now.duration_since(self.accepted_at) >= timeout
    }

    /// Transition to reading once registered with the event loop.
    pub fn start_reading(&mut self) -> Result<()> {
        self.transition(ConnState::Reading)
    }

    /// Transition to writing once the request head is complete, or once
    /// a rejection response has been prepared with [`reject`](Self::reject).
    pub fn start_writing(&mut self) -> Result<()> {
        if !self.inbound.is_complete() && !self.dispatched {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: ConnState::Writing,
            });
        }
        self.transition(ConnState::Writing)
    }

    /// Prepare a response that replaces the application's, e.g. for a
    /// request that could not be parsed.
    pub fn reject(&mut self, status: &str, response: Bytes) {
        self.dispatched = true;
        self.response = Some(ResponseHead {
            status: status.to_string(),
            headers: Vec::new(),
        });
        self.outbound.fill(response);
    }

    /// Mark connection closed.
    pub fn close(&mut self) -> Result<()> {
        self.transition(ConnState::Closed)
    }

    fn transition(&mut self, to: ConnState) -> Result<()> {
        let legal = matches!(
            (self.state, to),
            (ConnState::Accepting, ConnState::Reading)
                | (ConnState::Reading, ConnState::Writing)
                | (ConnState::Accepting, ConnState::Closed)
                | (ConnState::Reading, ConnState::Closed)
                | (ConnState::Writing, ConnState::Closed)
        );
        if !legal {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Registry of active connections using slab allocation.
///
/// Slab keys double as event loop tokens.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(4096)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> std::result::Result<usize, Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    /// Get an immutable reference to a connection.
    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Ids of every connection, in slab order.
    pub fn ids(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }

    /// Ids of connections older than `timeout`.
    pub fn expired(&self, timeout: Duration, now: Instant) -> Vec<usize> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.is_expired(timeout, now))
            .map(|(id, _)| id)
            .collect()
    }
}
