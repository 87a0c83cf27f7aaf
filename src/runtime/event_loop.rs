//! mio event loop with a per-token handler table.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! handler registered for that token performs non-blocking read/write
//! syscalls. Uses epoll on Linux, kqueue on macOS.
//!
//! The loop does not own sockets. It maps each `Token` to the handler that
//! should run on readiness and the interest it was registered with; the
//! context `C` passed to [`EventLoop::run`] owns the sockets and any
//! per-token state. Handlers are plain function pointers, so moving a
//! connection from "reading" to "writing" behaviour is a pointer swap.
//!
//! ## Iteration
//!
//! Each [`EventLoop::turn`]:
//! 1. runs the deferred callbacks that were queued before the turn began
//!    (callbacks queued while draining wait for the next turn),
//! 2. polls with the configured timeout,
//! 3. dispatches each reported event, in the order reported, to the handler
//!    currently registered for its token. Events for tokens that have been
//!    unregistered (including earlier in the same batch) are dropped.
//!
//! A handler error is logged at the dispatch site and never stops the loop.

use crate::error::{Error, Result};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Function invoked when a registered token becomes ready.
pub type Handler<C> = fn(&mut C, &mut EventLoop<C>, Token, Readiness) -> Result<()>;

/// Zero-argument callback run on the loop thread at the start of a turn.
pub type Deferred<C> = Box<dyn FnOnce(&mut C, &mut EventLoop<C>)>;

/// Readiness flags copied out of a mio event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub read_closed: bool,
    pub write_closed: bool,
}

impl Readiness {
    /// Error or hang-up on both directions.
    pub fn is_error(&self) -> bool {
        self.error || (self.read_closed && self.write_closed)
    }
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
        }
    }
}

struct Registration<C> {
    handler: Handler<C>,
    interest: Interest,
}

/// Single-threaded readiness loop.
pub struct EventLoop<C> {
    poll: Poll,
    events: Events,
    handlers: HashMap<Token, Registration<C>>,
    deferred: VecDeque<Deferred<C>>,
    /// Reused per turn to detach the event batch from `events`.
    ready: Vec<(Token, Readiness)>,
    poll_timeout: Duration,
    stopped: bool,
}

impl<C> fmt::Debug for EventLoop<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("registered", &self.handlers.len())
            .field("deferred", &self.deferred.len())
            .field("poll_timeout", &self.poll_timeout)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl<C> EventLoop<C> {
    /// Create a loop that polls for at most `poll_timeout` per turn and
    /// handles up to `events_capacity` events per poll.
    pub fn new(poll_timeout: Duration, events_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(events_capacity),
            handlers: HashMap::new(),
            deferred: VecDeque::new(),
            ready: Vec::with_capacity(events_capacity),
            poll_timeout,
            stopped: false,
        })
    }

    /// Add `source` to the multiplexer and the handler table.
    ///
    /// Fails with [`Error::AlreadyRegistered`] if `token` is already present.
    pub fn register<S>(
        &mut self,
        source: &mut S,
        token: Token,
        handler: Handler<C>,
        interest: Interest,
    ) -> Result<()>
    where
        S: Source + ?Sized,
    {
        if self.handlers.contains_key(&token) {
            return Err(Error::AlreadyRegistered(token));
        }
        self.poll.registry().register(source, token, interest)?;
        self.handlers.insert(token, Registration { handler, interest });
        trace!(token = token.0, ?interest, "registered");
        Ok(())
    }

    /// Change the monitored readiness conditions, keeping the handler.
    pub fn modify_interest<S>(&mut self, source: &mut S, token: Token, interest: Interest) -> Result<()>
    where
        S: Source + ?Sized,
    {
        let registration = self
            .handlers
            .get_mut(&token)
            .ok_or(Error::NotRegistered(token))?;
        self.poll.registry().reregister(source, token, interest)?;
        registration.interest = interest;
        trace!(token = token.0, ?interest, "interest modified");
        Ok(())
    }

    /// Swap the handler invoked on readiness without touching interest.
    pub fn replace_handler(&mut self, token: Token, handler: Handler<C>) -> Result<()> {
        let registration = self
            .handlers
            .get_mut(&token)
            .ok_or(Error::NotRegistered(token))?;
        registration.handler = handler;
        Ok(())
    }

    /// Remove `token` from the handler table and the multiplexer.
    ///
    /// Tolerates a token that is already gone; a deregistration failure is
    /// logged and otherwise ignored.
    pub fn unregister<S>(&mut self, source: &mut S, token: Token)
    where
        S: Source + ?Sized,
    {
        if self.handlers.remove(&token).is_none() {
            debug!(token = token.0, "unregister of unknown token");
        }
        if let Err(e) = self.poll.registry().deregister(source) {
            warn!(token = token.0, error = %e, "deregister failed");
        }
    }

    /// Queue a callback to run before the next poll.
    pub fn schedule<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut C, &mut EventLoop<C>) + 'static,
    {
        self.deferred.push_back(Box::new(callback));
    }

    /// Ask [`run`](Self::run) to return after the current turn.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether `token` currently has a handler.
    pub fn is_registered(&self, token: Token) -> bool {
        self.handlers.contains_key(&token)
    }

    /// Interest currently registered for `token`.
    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.handlers.get(&token).map(|r| r.interest)
    }

    /// Number of registered tokens.
    pub fn registered(&self) -> usize {
        self.handlers.len()
    }

    /// Number of callbacks waiting for the next turn.
    pub fn pending_callbacks(&self) -> usize {
        self.deferred.len()
    }

    /// Run until stopped or until polling fails.
    ///
    /// The context still owns its sources when this returns; it should
    /// unregister them and then call [`release`](Self::release).
    pub fn run(&mut self, ctx: &mut C) -> io::Result<()> {
        while !self.stopped {
            self.turn(ctx)?;
        }
        Ok(())
    }

    /// One iteration: deferred callbacks, poll, dispatch.
    ///
    /// Returns the number of events dispatched to a handler.
    pub fn turn(&mut self, ctx: &mut C) -> io::Result<usize> {
        self.run_deferred(ctx);

        if let Err(e) = self.poll.poll(&mut self.events, Some(self.poll_timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(e);
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(
            self.events
                .iter()
                .map(|event| (event.token(), Readiness::from(event))),
        );

        let mut dispatched = 0;
        for &(token, readiness) in &ready {
            // Unregistered earlier in this batch, or never known.
            let Some(handler) = self.handlers.get(&token).map(|r| r.handler) else {
                trace!(token = token.0, "dropping event for unregistered token");
                continue;
            };
            dispatched += 1;
            if let Err(e) = handler(ctx, self, token, readiness) {
                warn!(token = token.0, error = %e, "handler failed");
            }
        }

        self.ready = ready;
        Ok(dispatched)
    }

    fn run_deferred(&mut self, ctx: &mut C) {
        let queued = self.deferred.len();
        for _ in 0..queued {
            match self.deferred.pop_front() {
                Some(callback) => callback(ctx, self),
                None => break,
            }
        }
    }

    /// Drop every remaining handler and pending callback.
    pub fn release(&mut self) {
        if !self.handlers.is_empty() {
            debug!(remaining = self.handlers.len(), "releasing handler table");
        }
        self.handlers.clear();
        self.deferred.clear();
    }
}
