//! # Async Connection Engine
//!
//! Purpose: Multiplex many in-flight commands over one connection, matching
//! each arriving reply to the callback that issued it, with an explicit
//! connect/disconnect/reconnect state machine.
//!
//! ## Design Principles
//! 1. **FIFO Matching**: The protocol guarantees in-order replies on one
//!    connection, so the engine matches replies to callbacks purely by
//!    queue position; the queue length always equals the number of
//!    commands written but not yet answered.
//! 2. **Single-Threaded**: The engine and every callback run on the
//!    caller's current-thread runtime via `spawn_local`; internals are
//!    `Rc<RefCell<_>>` and there is no locking because there is no
//!    concurrent mutation.
//! 3. **No Silent Drops**: On any disconnect every pending callback fires
//!    with `None` (in FIFO order) before the disconnect handler runs.
//! 4. **Errors Are Values**: Connect failures and dropped connections reach
//!    the lifecycle handlers as error values, never as panics across the
//!    suspension boundary.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

use redpipe_proto::{encode_command, Command, ReplyDecoder};

use crate::error::{Error, Result};
use crate::reply::Reply;

/// Lifecycle states of an async connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No transport, no driver task.
    Idle,
    /// Connect attempt in progress.
    Connecting,
    /// Transport established; commands may be issued.
    Connected,
    /// Teardown in progress.
    Disconnecting,
}

/// Configuration for the async connection.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Reconnect automatically after an *unexpected* disconnect.
    pub reconnect: bool,
}

type ReplyCallback = Box<dyn FnOnce(Option<Reply>)>;
type LifecycleCallback = Box<dyn FnMut(Result<()>)>;

struct Inner {
    config: ConnConfig,
    state: ConnState,
    /// Callbacks for commands written but not yet answered, FIFO.
    pending: VecDeque<ReplyCallback>,
    /// Serialized commands not yet handed to the socket.
    write_buf: Vec<u8>,
    disconnect_requested: bool,
    on_connected: Option<LifecycleCallback>,
    on_disconnected: Option<LifecycleCallback>,
}

/// One async connection driven by the caller's current-thread runtime.
///
/// [`AsyncConnection::connect`] spawns the driver with
/// `tokio::task::spawn_local`, so it must be called inside a
/// [`tokio::task::LocalSet`]. Cloning yields another handle to the same
/// connection.
#[derive(Clone)]
pub struct AsyncConnection {
    inner: Rc<RefCell<Inner>>,
    notify: Rc<Notify>,
}

impl AsyncConnection {
    /// Creates an idle connection handle for the given address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_config(ConnConfig {
            addr: addr.into(),
            reconnect: false,
        })
    }

    /// Creates an idle connection handle with a custom configuration.
    pub fn with_config(config: ConnConfig) -> Self {
        AsyncConnection {
            inner: Rc::new(RefCell::new(Inner {
                config,
                state: ConnState::Idle,
                pending: VecDeque::new(),
                write_buf: Vec::with_capacity(256),
                disconnect_requested: false,
                on_connected: None,
                on_disconnected: None,
            })),
            notify: Rc::new(Notify::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.inner.borrow().state
    }

    /// Number of commands written but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Sets the reconnect-on-unexpected-disconnect policy bit.
    pub fn set_reconnect(&self, reconnect: bool) {
        self.inner.borrow_mut().config.reconnect = reconnect;
    }

    /// Starts a non-blocking connect and moves Idle to Connecting.
    ///
    /// Exactly one of the two handlers fires per lifecycle transition:
    /// `on_connected` with the connect result, `on_disconnected` with the
    /// teardown result. With the reconnect flag set the handlers are kept
    /// and fire again for each automatic reconnection.
    pub fn connect<C, D>(&self, on_connected: C, on_disconnected: D) -> Result<()>
    where
        C: FnMut(Result<()>) + 'static,
        D: FnMut(Result<()>) + 'static,
    {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ConnState::Idle {
                return Err(Error::Connection(format!(
                    "connect attempted in state {:?}",
                    inner.state
                )));
            }
            inner.state = ConnState::Connecting;
            inner.disconnect_requested = false;
            inner.on_connected = Some(Box::new(on_connected));
            inner.on_disconnected = Some(Box::new(on_disconnected));
        }
        tokio::task::spawn_local(drive(self.inner.clone(), self.notify.clone()));
        Ok(())
    }

    /// Serializes a command, queues it for writing, and enqueues `on_reply`
    /// at the tail of the pending-callback FIFO.
    ///
    /// Fails synchronously with [`Error::NotConnected`] unless the
    /// connection is Connected and not being torn down; nothing is queued
    /// in that case. The callback later receives `Some(reply)` or, when
    /// the connection goes away first, `None` meaning the command's
    /// outcome is unknown.
    pub fn exec<F>(&self, command: Command, on_reply: F) -> Result<()>
    where
        F: FnOnce(Option<Reply>) + 'static,
    {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ConnState::Connected || inner.disconnect_requested {
                return Err(Error::NotConnected);
            }
            encode_command(&command, &mut inner.write_buf);
            inner.pending.push_back(Box::new(on_reply));
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Requests teardown; idempotent, a no-op when already Idle or
    /// Disconnecting. A requested disconnect never triggers reconnection.
    pub fn disconnect(&self) {
        let teardown = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                ConnState::Idle | ConnState::Disconnecting => false,
                ConnState::Connecting | ConnState::Connected => {
                    inner.disconnect_requested = true;
                    inner.state = ConnState::Disconnecting;
                    true
                }
            }
        };
        if teardown {
            self.notify.notify_one();
        }
    }
}

/// Why a connected transport went away.
enum Closed {
    /// `disconnect()` was called.
    Requested,
    /// The peer or the socket failed.
    Dropped(io::Error),
}

async fn drive(inner: Rc<RefCell<Inner>>, notify: Rc<Notify>) {
    loop {
        let addr = inner.borrow().config.addr.clone();
        debug!(addr = %addr, "connecting");

        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(addr = %addr, error = %err, "connect failed");
                let mut guard = inner.borrow_mut();
                guard.state = ConnState::Idle;
                guard.on_disconnected = None;
                drop(guard);
                fire_connected(
                    &inner,
                    Err(Error::Connection(format!(
                        "failed to connect to {}: {}",
                        addr, err
                    ))),
                );
                return;
            }
        };

        if inner.borrow().disconnect_requested {
            // disconnect() raced the connect attempt; tear down without
            // ever reporting the connection as established.
            fire_disconnected(&inner, Ok(()));
            reset_to_idle(&inner);
            return;
        }

        stream.set_nodelay(true).ok();
        inner.borrow_mut().state = ConnState::Connected;
        debug!(addr = %addr, "connected");
        fire_connected(&inner, Ok(()));

        let closed = run_connected(&inner, &notify, stream).await;

        {
            let mut guard = inner.borrow_mut();
            guard.state = ConnState::Disconnecting;
            guard.write_buf.clear();
        }
        drain_pending(&inner);

        match closed {
            Closed::Requested => {
                debug!(addr = %addr, "disconnected");
                fire_disconnected(&inner, Ok(()));
                reset_to_idle(&inner);
                return;
            }
            Closed::Dropped(err) => {
                warn!(addr = %addr, error = %err, "connection dropped");
                fire_disconnected(
                    &inner,
                    Err(Error::Connection(format!(
                        "connection to {} dropped: {}",
                        addr, err
                    ))),
                );
                let again = {
                    let guard = inner.borrow();
                    guard.config.reconnect && !guard.disconnect_requested
                };
                if !again {
                    reset_to_idle(&inner);
                    return;
                }
                debug!(addr = %addr, "reconnecting");
                inner.borrow_mut().state = ConnState::Connecting;
            }
        }
    }
}

async fn run_connected(
    inner: &Rc<RefCell<Inner>>,
    notify: &Rc<Notify>,
    mut stream: TcpStream,
) -> Closed {
    let mut read_buf = BytesMut::with_capacity(8 * 1024);
    let mut decoder = ReplyDecoder::new();

    loop {
        let (outgoing, requested) = {
            let mut guard = inner.borrow_mut();
            (std::mem::take(&mut guard.write_buf), guard.disconnect_requested)
        };
        if requested {
            return Closed::Requested;
        }
        if !outgoing.is_empty() {
            if let Err(err) = stream.write_all(&outgoing).await {
                return Closed::Dropped(err);
            }
        }

        tokio::select! {
            _ = notify.notified() => {}
            read = stream.read_buf(&mut read_buf) => {
                let bytes = match read {
                    Ok(bytes) => bytes,
                    Err(err) => return Closed::Dropped(err),
                };
                if bytes == 0 {
                    return Closed::Dropped(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ));
                }
                loop {
                    let node = match decoder.decode(&mut read_buf) {
                        Ok(Some(node)) => node,
                        Ok(None) => break,
                        Err(err) => {
                            return Closed::Dropped(io::Error::new(
                                io::ErrorKind::InvalidData,
                                err.to_string(),
                            ))
                        }
                    };
                    // Release the borrow before invoking user code; the
                    // callback may issue further commands.
                    let callback = inner.borrow_mut().pending.pop_front();
                    match callback {
                        Some(callback) => callback(Some(Reply::new(node))),
                        None => {
                            return Closed::Dropped(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "reply arrived with no pending command",
                            ))
                        }
                    }
                }
            }
        }
    }
}

fn drain_pending(inner: &Rc<RefCell<Inner>>) {
    loop {
        let callback = inner.borrow_mut().pending.pop_front();
        match callback {
            Some(callback) => callback(None),
            None => break,
        }
    }
}

fn reset_to_idle(inner: &Rc<RefCell<Inner>>) {
    let mut guard = inner.borrow_mut();
    guard.state = ConnState::Idle;
    guard.disconnect_requested = false;
    guard.on_connected = None;
    guard.on_disconnected = None;
}

// Handlers are taken out of the cell while they run so they can call back
// into the connection, then put back for reuse on reconnection.
fn fire_connected(inner: &Rc<RefCell<Inner>>, result: Result<()>) {
    let callback = inner.borrow_mut().on_connected.take();
    if let Some(mut callback) = callback {
        callback(result);
        let mut guard = inner.borrow_mut();
        if guard.on_connected.is_none() && guard.state != ConnState::Idle {
            guard.on_connected = Some(callback);
        }
    }
}

fn fire_disconnected(inner: &Rc<RefCell<Inner>>, result: Result<()>) {
    let callback = inner.borrow_mut().on_disconnected.take();
    if let Some(mut callback) = callback {
        callback(result);
        let mut guard = inner.borrow_mut();
        if guard.on_disconnected.is_none() && guard.state != ConnState::Idle {
            guard.on_disconnected = Some(callback);
        }
    }
}
