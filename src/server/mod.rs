//! HTTP connection server on top of the event loop.
//!
//! Handles incoming connections, accumulates each request head, hands the
//! request description to the application once, and streams the response
//! back before closing.
//!
//! Per connection the handler registered with the loop moves through:
//!
//! ```text
//! on_accept --register(READABLE)--> on_readable --terminator--> on_writable --drained--> closed
//! ```
//!
//! Every handler closes its own connection on failure, so nothing is left
//! registered after an error. Transport errors stop there; protocol and
//! application errors are additionally returned to the loop, which logs
//! them.

pub mod listener;

use crate::application::{Application, StartResponse};
use crate::config::Config;
use crate::error::{ApplicationError, Error, ProtocolError, Result};
use crate::http::environ::{Environ, ServerIdentity};
use crate::http::response::{self, SERVER_SOFTWARE};
use crate::runtime::{ConnState, Connection, ConnectionRegistry, EventLoop, Readiness};
use chrono::Utc;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use std::any::Any;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Token of the listening socket. Connection tokens are slab keys;
/// `usize::MAX` itself is reserved by mio.
pub const LISTENER: Token = Token(usize::MAX - 1);

/// Upper bound between two deadline sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

const BAD_REQUEST: &str = "400 Bad Request";
const HEAD_TOO_LARGE: &str = "431 Request Header Fields Too Large";

/// Result of draining a readable socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    /// No terminator yet; wait for more readiness.
    Pending,
    /// Header terminator present.
    HeadComplete,
    /// Peer closed before the request head was complete.
    PeerClosed,
    /// Buffered bytes exceed the limit without a terminator.
    TooLarge,
}

/// Server instance
pub struct Server<A> {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    identity: ServerIdentity,
    server_software: String,
    connections: ConnectionRegistry,
    application: A,
    /// Scratch space for socket reads, shared by all connections.
    scratch: Vec<u8>,
    max_request_size: usize,
    request_timeout: Option<Duration>,
    last_sweep: Instant,
    completed: u64,
}

impl<A: Application + 'static> Server<A> {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: &Config, application: A) -> Result<Self> {
        let addr = config.addr().map_err(|e| Error::Bind {
            addr: format!("{}:{}", config.host, config.port),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })?;
        let listener = listener::bind(addr, config.backlog)?;
        let local_addr = listener.local_addr()?;

        let identity = ServerIdentity {
            name: config
                .server_name
                .clone()
                .unwrap_or_else(|| local_addr.ip().to_string()),
            port: local_addr.port(),
        };

        Ok(Server {
            listener: Some(listener),
            local_addr,
            identity,
            server_software: config
                .server_software
                .clone()
                .unwrap_or_else(|| SERVER_SOFTWARE.to_string()),
            connections: ConnectionRegistry::new(config.max_connections),
            application,
            scratch: vec![0u8; config.read_buffer_size],
            max_request_size: config.max_request_size,
            request_timeout: config.request_timeout,
            last_sweep: Instant::now(),
            completed: 0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Number of exchanges whose response was fully written.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Whether the listener is still accepting.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Register the listener with `event_loop` and queue the deadline sweep.
    pub fn start(&mut self, event_loop: &mut EventLoop<Self>) -> Result<()> {
        let listener = self
            .listener
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener closed"))?;
        event_loop.register(listener, LISTENER, Self::on_accept, Interest::READABLE)?;
        if self.request_timeout.is_some() {
            event_loop.schedule(Self::sweep);
        }
        info!(addr = %self.local_addr, "Server listening");
        Ok(())
    }

    /// Serve until the loop stops or fails, then close everything.
    pub fn serve_forever(mut self, event_loop: &mut EventLoop<Self>) -> Result<()> {
        self.start(event_loop)?;
        self.run(event_loop)
    }

    /// Drive an already started server until the loop stops or fails,
    /// then close every connection and release the loop.
    pub fn run(&mut self, event_loop: &mut EventLoop<Self>) -> Result<()> {
        let result = event_loop.run(self);
        if let Err(ref e) = result {
            error!(error = %e, "Event loop failed");
        }
        self.shutdown(event_loop);
        event_loop.release();
        result.map_err(Error::from)
    }

    /// Close every connection and the listener.
    pub fn shutdown(&mut self, event_loop: &mut EventLoop<Self>) {
        let open = self.connections.len();
        for id in self.connections.ids() {
            self.close_connection(event_loop, Token(id));
        }
        self.close_listener(event_loop);
        info!(closed = open, completed = self.completed, "Server shut down");
    }

    fn on_accept(&mut self, event_loop: &mut EventLoop<Self>, _token: Token, ready: Readiness) -> Result<()> {
        if ready.is_error() {
            error!("Listener reported an error, no longer accepting");
            self.close_listener(event_loop);
            event_loop.stop();
            return Ok(());
        }

        loop {
            let accepted = match self.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => return Ok(()),
            };
            match accepted {
                Ok((stream, peer)) => self.admit(event_loop, stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Typically descriptor exhaustion; retry on the next readiness.
                    warn!(error = %e, "Accept error");
                    return Ok(());
                }
            }
        }
    }

    fn admit(&mut self, event_loop: &mut EventLoop<Self>, stream: TcpStream, peer: SocketAddr) {
        let conn = Connection::new(stream, peer, self.scratch.len());
        let id = match self.connections.insert(conn) {
            Ok(id) => id,
            Err(_) => {
                warn!(peer = %peer, "Connection limit reached");
                return;
            }
        };
        let token = Token(id);

        let registered = match self.connections.get_mut(id) {
            Some(conn) => event_loop
                .register(&mut conn.stream, token, Self::on_readable, Interest::READABLE)
                .and_then(|()| conn.start_reading()),
            None => return,
        };
        if let Err(e) = registered {
            warn!(peer = %peer, error = %e, "Failed to register connection");
            self.close_connection(event_loop, token);
            return;
        }

        debug!(conn_id = id, peer = %peer, "Accepted connection");
    }

    fn on_readable(&mut self, event_loop: &mut EventLoop<Self>, token: Token, ready: Readiness) -> Result<()> {
        if ready.error {
            debug!(conn_id = token.0, "Socket error while reading");
            self.close_connection(event_loop, token);
            return Ok(());
        }

        match self.read_request(token) {
            Ok(ReadOutcome::Pending) => Ok(()),
            Ok(ReadOutcome::HeadComplete) => {
                let switched = self.begin_writing(event_loop, token);
                self.settle(event_loop, token, switched)
            }
            Ok(ReadOutcome::PeerClosed) => {
                debug!(conn_id = token.0, "Peer closed before completing request");
                self.close_connection(event_loop, token);
                Ok(())
            }
            Ok(ReadOutcome::TooLarge) => {
                let limit = self.max_request_size;
                self.reject(token, HEAD_TOO_LARGE);
                let switched = self.begin_writing(event_loop, token);
                self.settle(event_loop, token, switched)?;
                Err(ProtocolError::HeadTooLarge { limit }.into())
            }
            Err(e) => self.settle(event_loop, token, Err(e)),
        }
    }

    /// Read until the socket would block, the peer closes, or the head
    /// outgrows the limit.
    fn read_request(&mut self, token: Token) -> Result<ReadOutcome> {
        let Server {
            connections,
            scratch,
            max_request_size,
            ..
        } = self;
        let conn = connections
            .get_mut(token.0)
            .ok_or(Error::NotRegistered(token))?;

        loop {
            match conn.stream.read(scratch) {
                Ok(0) => {
                    return Ok(if conn.inbound.is_complete() {
                        ReadOutcome::HeadComplete
                    } else {
                        ReadOutcome::PeerClosed
                    });
                }
                Ok(n) => {
                    let complete = conn.inbound.push(&scratch[..n]);
                    trace!(conn_id = token.0, bytes = n, buffered = conn.inbound.len(), "Read fragment");
                    if conn.inbound.len() > *max_request_size {
                        let head_len = conn.inbound.head().map_or(usize::MAX, <[u8]>::len);
                        if complete && head_len <= *max_request_size {
                            // Body bytes past the limit stay unread.
                            break;
                        }
                        return Ok(ReadOutcome::TooLarge);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(if conn.inbound.is_complete() {
            ReadOutcome::HeadComplete
        } else {
            ReadOutcome::Pending
        })
    }

    /// The only read -> write transition.
    fn begin_writing(&mut self, event_loop: &mut EventLoop<Self>, token: Token) -> Result<()> {
        let conn = self
            .connections
            .get_mut(token.0)
            .ok_or(Error::NotRegistered(token))?;
        conn.start_writing()?;
        event_loop.modify_interest(&mut conn.stream, token, Interest::WRITABLE)?;
        event_loop.replace_handler(token, Self::on_writable)
    }

    fn on_writable(&mut self, event_loop: &mut EventLoop<Self>, token: Token, ready: Readiness) -> Result<()> {
        if ready.is_error() {
            debug!(conn_id = token.0, "Socket error while writing");
            self.close_connection(event_loop, token);
            return Ok(());
        }

        match self.write_response(token) {
            Ok(true) => {
                self.complete(event_loop, token);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => self.settle(event_loop, token, Err(e)),
        }
    }

    /// Build the response on first call, then write as much as the socket
    /// takes. Returns `true` once everything has been written.
    fn write_response(&mut self, token: Token) -> Result<bool> {
        let dispatched = self
            .connections
            .get(token.0)
            .ok_or(Error::NotRegistered(token))?
            .dispatched;
        if !dispatched {
            self.dispatch(token)?;
        }

        let conn = self
            .connections
            .get_mut(token.0)
            .ok_or(Error::NotRegistered(token))?;
        while !conn.outbound.is_drained() {
            match conn.stream.write(conn.outbound.remaining()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    conn.outbound.advance(n);
                    trace!(conn_id = token.0, bytes = n, remaining = conn.outbound.remaining_len(), "Wrote fragment");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Invoke the application once and assemble the outbound bytes.
    ///
    /// A malformed request is answered with 400 instead; application
    /// failures leave the outbound buffer empty and return an error.
    fn dispatch(&mut self, token: Token) -> Result<()> {
        let Server {
            connections,
            application,
            identity,
            server_software,
            ..
        } = self;
        let conn = connections
            .get_mut(token.0)
            .ok_or(Error::NotRegistered(token))?;
        conn.dispatched = true;

        let head = conn.inbound.head().ok_or(Error::InvalidTransition {
            from: conn.state(),
            to: ConnState::Writing,
        })?;
        for line in String::from_utf8_lossy(head).lines() {
            trace!(conn_id = token.0, "< {}", line);
        }

        let environ = match Environ::parse(head, conn.inbound.body(), identity, Some(conn.peer)) {
            Ok(environ) => environ,
            Err(e) => {
                debug!(conn_id = token.0, peer = %conn.peer, error = %e, "Rejecting malformed request");
                let date = response::http_date(Utc::now());
                conn.reject(BAD_REQUEST, response::error_response(BAD_REQUEST, &date, server_software));
                return Ok(());
            }
        };

        let mut start = StartResponse::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            application.call(&environ, &mut start)
        }));
        let body = match outcome {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Err(ApplicationError::Failed(e).into()),
            Err(payload) => return Err(ApplicationError::Panicked(panic_message(payload.as_ref())).into()),
        };
        let head = start.finish()?;

        let date = response::http_date(Utc::now());
        let bytes = response::assemble(&head, &date, server_software, &body);
        for line in String::from_utf8_lossy(&bytes[..bytes.len() - response::body_len(&body)]).lines() {
            trace!(conn_id = token.0, "> {}", line);
        }

        conn.request_line = Some((environ.method, environ.path));
        conn.response = Some(head);
        conn.outbound.fill(bytes);
        Ok(())
    }

    fn reject(&mut self, token: Token, status: &str) {
        let date = response::http_date(Utc::now());
        let bytes = response::error_response(status, &date, &self.server_software);
        if let Some(conn) = self.connections.get_mut(token.0) {
            conn.reject(status, bytes);
        }
    }

    /// Close on failure; only non-transport errors reach the loop.
    fn settle(&mut self, event_loop: &mut EventLoop<Self>, token: Token, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close_connection(event_loop, token);
                if e.is_transport() {
                    debug!(conn_id = token.0, error = %e, "Connection error");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn complete(&mut self, event_loop: &mut EventLoop<Self>, token: Token) {
        if let Some(conn) = self.connections.get(token.0) {
            let (method, path) = conn
                .request_line
                .as_ref()
                .map(|(m, p)| (m.as_str(), p.as_str()))
                .unwrap_or(("-", "-"));
            let status = conn.response.as_ref().map(|r| r.code()).unwrap_or("-");
            info!(
                peer = %conn.peer,
                method,
                path,
                status,
                bytes = conn.outbound.written(),
                "Request completed"
            );
        }
        self.completed += 1;
        self.close_connection(event_loop, token);
    }

    fn close_connection(&mut self, event_loop: &mut EventLoop<Self>, token: Token) {
        if let Some(mut conn) = self.connections.remove(token.0) {
            event_loop.unregister(&mut conn.stream, token);
            if let Err(e) = conn.stream.shutdown(Shutdown::Both) {
                trace!(conn_id = token.0, error = %e, "Shutdown failed");
            }
            let state = conn.state();
            if let Err(e) = conn.close() {
                debug!(conn_id = token.0, error = %e, "Close from unexpected state");
            }
            debug!(conn_id = token.0, peer = %conn.peer, ?state, age = ?conn.age(), "Connection closed");
        }
    }

    fn close_listener(&mut self, event_loop: &mut EventLoop<Self>) {
        if let Some(mut listener) = self.listener.take() {
            event_loop.unregister(&mut listener, LISTENER);
            debug!("Listener closed");
        }
    }

    /// Deferred callback: close connections past their deadline, then
    /// requeue for the next turn.
    fn sweep(&mut self, event_loop: &mut EventLoop<Self>) {
        let Some(timeout) = self.request_timeout else {
            return;
        };
        let now = Instant::now();
        if now.duration_since(self.last_sweep) >= timeout.min(SWEEP_INTERVAL) {
            self.last_sweep = now;
            for id in self.connections.expired(timeout, now) {
                debug!(conn_id = id, "Request deadline exceeded");
                self.close_connection(event_loop, Token(id));
            }
        }
        if !event_loop.is_stopped() {
            event_loop.schedule(Self::sweep);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests;
