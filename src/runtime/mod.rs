//! Readiness-driven runtime.
//!
//! - `EventLoop`: the single polling loop, handler table and deferred queue
//! - `Connection`: per-connection state machine and buffers
//! - `ConnectionRegistry`: slab of live connections, keyed by token

mod buffer;
mod connection;
mod event_loop;

pub use buffer::{InboundBuffer, OutboundBuffer};
pub use connection::{ConnState, Connection, ConnectionRegistry, ResponseHead};
pub use event_loop::{Deferred, EventLoop, Handler, Readiness};
