//! Network Module Implementation
//!
//! The TCP messaging core: one reactor thread, any number of listeners and
//! outgoing connections, and length-prefixed message frames dispatched to
//! application handlers.
//!
//! # Architecture
//!
//! The module is built on tokio's async I/O primitives, driven by a
//! single-threaded runtime on a dedicated thread:
//! - `Network` owns the reactor thread, the listeners and the outgoing connections
//! - `Listener` runs an accept loop that starts a connection task per peer
//! - `Connection` tasks read frames, dispatch them, and drain an ordered
//!   outgoing queue
//! - `MessageCodec` frames messages on the wire
//!
//! # Ownership
//!
//! Live connections sit in a table keyed by `ConnectionId`. Tasks hold ids,
//! never owning references; a completion whose id is gone from the table is
//! dropped. A failing connection is reported and closed on its own, the
//! reactor keeps serving the others.

pub use connection::{Connection, ConnectionId, ConnectionState, Direction};
pub use frame::MessageCodec;
pub use handler::{HandlerRef, MessageHandler};
pub use listener::Listener;
pub use reactor::Network;

mod connection;
mod context;
mod frame;
mod handler;
mod listener;
mod reactor;
