//! # Redpipe Client
//!
//! Purpose: Provide a Redis-compatible client with a typed reply model, a
//! blocking session for request/reply, pipelining and transactions, and an
//! event-driven connection engine that multiplexes many in-flight commands
//! over one connection.
//!
//! ## Design Principles
//! 1. **Typed Reply Views**: One wire reply can be read as status, integer,
//!    optional integer or array without re-parsing; array elements are
//!    non-owning views into shared storage.
//! 2. **Strict FIFO**: The protocol serializes replies in command order on a
//!    connection, so pipelining and async callback matching need no tags.
//! 3. **Fail Fast**: A broken transport is dropped immediately and never
//!    reused; error replies surface as typed errors at the access site.
//! 4. **Explicit Lifecycle**: The async engine is a small state machine with
//!    no global event loop; it runs on the caller's runtime.

mod conn;
mod error;
mod reply;
mod session;

pub use conn::{AsyncConnection, ConnConfig, ConnState};
pub use error::{Error, Result};
pub use redpipe_proto::{Command, CommandArg, ReplyNode};
pub use reply::{Reply, NIL};
pub use session::{Session, SessionConfig};
