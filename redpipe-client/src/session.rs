//! # Synchronous Session
//!
//! Purpose: Blocking request/reply over one TCP connection, with pipelining
//! and MULTI/EXEC transactions built from the same two primitives.
//!
//! ## Design Principles
//! 1. **Begin/End Split**: `begin_command` writes, `end_command` reads one
//!    reply; `execute` is the pair, and pipelining is N begins followed by
//!    N ends. The split is the primitive everything else composes.
//! 2. **Lazy Connect**: The transport is established on first use; a failed
//!    establish leaves the session unconnected.
//! 3. **Fail Fast**: Any fatal read/write error drops the transport handle
//!    immediately; the next operation reconnects from scratch.
//! 4. **Buffer Reuse**: One write buffer per session, reused across calls.

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use redpipe_proto::{encode_command, read_reply, Command};

use crate::error::{Error, Result};
use crate::reply::Reply;

/// Configuration for the synchronous session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            addr: "127.0.0.1:6379".to_string(),
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

struct Transport {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    write_buf: Vec<u8>,
}

/// Blocking session over a single lazily-established connection.
///
/// At most one write/read cycle is in flight at a time; pipelining writes
/// N commands back to back and then reads exactly N replies in order.
pub struct Session {
    config: SessionConfig,
    transport: Option<Transport>,
}

impl Session {
    /// Creates an unconnected session for the given address.
    pub fn new(addr: impl Into<String>) -> Self {
        let mut config = SessionConfig::default();
        config.addr = addr.into();
        Self::with_config(config)
    }

    /// Creates an unconnected session with a custom configuration.
    pub fn with_config(config: SessionConfig) -> Self {
        Session {
            config,
            transport: None,
        }
    }

    /// True while the session holds a live transport handle.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&mut self) -> Result<&mut Transport> {
        if self.transport.is_none() {
            let stream = connect_stream(&self.config)?;
            let configure = || -> std::io::Result<()> {
                stream.set_read_timeout(self.config.read_timeout)?;
                stream.set_write_timeout(self.config.write_timeout)?;
                // Disable Nagle to keep request latency low for small payloads.
                stream.set_nodelay(true)
            };
            configure()
                .map_err(|err| Error::Connection(format!("failed to configure socket: {}", err)))?;

            debug!(addr = %self.config.addr, "session connected");
            self.transport = Some(Transport {
                reader: BufReader::new(stream),
                write_buf: Vec::with_capacity(256),
            });
        }
        Ok(self.transport.as_mut().expect("transport just established"))
    }

    /// Serializes and writes one command without reading its reply.
    ///
    /// Establishes the transport if needed. Pair with [`Session::end_command`].
    pub fn begin_command(&mut self, command: &Command) -> Result<()> {
        let transport = self.transport()?;
        transport.write_buf.clear();
        encode_command(command, &mut transport.write_buf);

        let Transport { reader, write_buf } = transport;
        let stream = reader.get_mut();
        let io = stream.write_all(write_buf).and_then(|_| stream.flush());
        if let Err(err) = io {
            warn!(error = %err, "write failed, dropping session transport");
            self.transport = None;
            return Err(Error::Io(err));
        }
        Ok(())
    }

    /// Blocks until one reply has been read.
    pub fn end_command(&mut self) -> Result<Reply> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        match read_reply(&mut transport.reader) {
            Ok(node) => Ok(Reply::new(node)),
            Err(err) => {
                warn!(error = %err, "read failed, dropping session transport");
                self.transport = None;
                Err(err.into())
            }
        }
    }

    /// Writes one command and blocks until its reply is read.
    pub fn execute(&mut self, command: Command) -> Result<Reply> {
        self.begin_command(&command)?;
        self.end_command()
    }

    /// Writes all commands back to back, then reads exactly as many replies.
    ///
    /// `replies[i]` corresponds to `commands[i]`; the protocol serializes
    /// replies in receipt order on one connection.
    pub fn pipeline(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        for command in &commands {
            self.begin_command(command)?;
        }
        let mut replies = Vec::with_capacity(commands.len());
        for _ in 0..commands.len() {
            replies.push(self.end_command()?);
        }
        Ok(replies)
    }

    /// Runs the commands inside MULTI/EXEC framing and returns the final
    /// array reply holding the transaction results.
    pub fn transaction(&mut self, commands: Vec<Command>) -> Result<Reply> {
        self.begin_command(&Command::new("MULTI"))?;
        for command in &commands {
            self.begin_command(command)?;
        }
        self.begin_command(&Command::new("EXEC"))?;

        // Every reply must be drained before an error is reported; an early
        // return would leave unread replies on the wire and desynchronize
        // every later command on this session.
        let mut first_error = self.end_command()?.check_error().err();
        for _ in 0..commands.len() {
            // One queued acknowledgement per command; a command rejected at
            // queue time (e.g. wrong arity) surfaces here.
            let ack = self.end_command()?;
            if first_error.is_none() {
                first_error = ack.check_error().err();
            }
        }
        let exec = self.end_command()?;
        match first_error {
            Some(err) => Err(err),
            None => Ok(exec),
        }
    }

    // Convenience command methods. These are call-sites over the builder
    // plus `execute`; the typed returns mirror what each command replies.

    /// Pings the server and returns its status line.
    pub fn ping(&mut self) -> Result<String> {
        self.execute(Command::new("PING"))?.as_status()
    }

    /// Selects the logical database.
    pub fn select(&mut self, database: i64) -> Result<()> {
        self.execute(Command::new("SELECT").arg(database))?
            .check_error()
    }

    /// Fetches a value by key; `None` when the key is missing.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        optional_bulk(&self.execute(Command::new("GET").arg(key))?)
    }

    /// Sets a value for a key.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.execute(Command::new("SET").arg(key).arg(value))?
            .as_status()
            .map(|_| ())
    }

    /// Sets a value only when the key does not exist yet.
    pub fn setnx(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        Ok(self
            .execute(Command::new("SETNX").arg(key).arg(value))?
            .as_integer()?
            == 1)
    }

    /// Returns true when the key exists.
    pub fn exists(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.execute(Command::new("EXISTS").arg(key))?.as_integer()? != 0)
    }

    /// Deletes a key; true when a key was removed.
    pub fn del(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.execute(Command::new("DEL").arg(key))?.as_integer()? > 0)
    }

    /// Deletes several keys; returns how many were removed.
    pub fn del_many(&mut self, keys: &[&[u8]]) -> Result<i64> {
        self.execute(Command::new("DEL").args(keys.iter().copied()))?
            .as_integer()
    }

    /// Increments a counter key and returns the new value.
    pub fn incr(&mut self, key: &[u8]) -> Result<i64> {
        self.execute(Command::new("INCR").arg(key))?.as_integer()
    }

    /// Fetches several keys at once; missing keys come back as `None`.
    pub fn mget(&mut self, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        let reply = self.execute(Command::new("MGET").args(keys.iter().copied()))?;
        let mut values = Vec::with_capacity(reply.len()?);
        for index in 0..reply.len()? {
            values.push(optional_bulk(&reply.at(index)?)?);
        }
        Ok(values)
    }

    /// Lists keys matching a glob pattern.
    pub fn keys(&mut self, pattern: &[u8]) -> Result<Vec<Vec<u8>>> {
        bulk_list(&self.execute(Command::new("KEYS").arg(pattern))?)
    }

    /// Pushes a value at the head of a list; returns the new length.
    pub fn lpush(&mut self, key: &[u8], value: &[u8]) -> Result<i64> {
        self.execute(Command::new("LPUSH").arg(key).arg(value))?
            .as_integer()
    }

    /// Pushes a value at the tail of a list; returns the new length.
    pub fn rpush(&mut self, key: &[u8], value: &[u8]) -> Result<i64> {
        self.execute(Command::new("RPUSH").arg(key).arg(value))?
            .as_integer()
    }

    /// Pops the head of a list.
    pub fn lpop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        optional_bulk(&self.execute(Command::new("LPOP").arg(key))?)
    }

    /// Pops the tail of a list.
    pub fn rpop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        optional_bulk(&self.execute(Command::new("RPOP").arg(key))?)
    }

    /// Length of a list.
    pub fn llen(&mut self, key: &[u8]) -> Result<i64> {
        self.execute(Command::new("LLEN").arg(key))?.as_integer()
    }

    /// Element of a list at `index`.
    pub fn lindex(&mut self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        optional_bulk(&self.execute(Command::new("LINDEX").arg(key).arg(index))?)
    }

    /// Range of a list between `start` and `stop`, inclusive.
    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        bulk_list(&self.execute(Command::new("LRANGE").arg(key).arg(start).arg(stop))?)
    }

    /// Fetches a hash field.
    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        optional_bulk(&self.execute(Command::new("HGET").arg(key).arg(field))?)
    }

    /// Sets a hash field; returns how many new fields were created.
    pub fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> Result<i64> {
        self.execute(Command::new("HSET").arg(key).arg(field).arg(value))?
            .as_integer()
    }

    /// Sets a hash field only when absent.
    pub fn hsetnx(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        Ok(self
            .execute(Command::new("HSETNX").arg(key).arg(field).arg(value))?
            .as_integer()?
            == 1)
    }

    /// Deletes a hash field; returns how many fields were removed.
    pub fn hdel(&mut self, key: &[u8], field: &[u8]) -> Result<i64> {
        self.execute(Command::new("HDEL").arg(key).arg(field))?
            .as_integer()
    }

    /// Increments a hash field and returns the new value.
    pub fn hincrby(&mut self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        self.execute(Command::new("HINCRBY").arg(key).arg(field).arg(delta))?
            .as_integer()
    }

    /// Fetches all fields and values of a hash.
    pub fn hgetall(&mut self, key: &[u8]) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        let reply = self.execute(Command::new("HGETALL").arg(key))?;
        let len = reply.len()?;
        if len % 2 != 0 {
            return Err(Error::Protocol("HGETALL reply has odd length".to_string()));
        }
        let mut map = HashMap::with_capacity(len / 2);
        let mut index = 0;
        while index < len {
            let field = reply.at(index)?.as_bytes()?.to_vec();
            let value = reply.at(index + 1)?.as_bytes()?.to_vec();
            map.insert(field, value);
            index += 2;
        }
        Ok(map)
    }

    /// Adds a member to a set; returns how many members were added.
    pub fn sadd(&mut self, key: &[u8], member: &[u8]) -> Result<i64> {
        self.execute(Command::new("SADD").arg(key).arg(member))?
            .as_integer()
    }

    /// Removes a member from a set; returns how many were removed.
    pub fn srem(&mut self, key: &[u8], member: &[u8]) -> Result<i64> {
        self.execute(Command::new("SREM").arg(key).arg(member))?
            .as_integer()
    }

    /// True when the member is in the set.
    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> Result<bool> {
        Ok(self
            .execute(Command::new("SISMEMBER").arg(key).arg(member))?
            .as_integer()?
            == 1)
    }

    /// All members of a set.
    pub fn smembers(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        bulk_list(&self.execute(Command::new("SMEMBERS").arg(key))?)
    }

    /// Cardinality of a set.
    pub fn scard(&mut self, key: &[u8]) -> Result<i64> {
        self.execute(Command::new("SCARD").arg(key))?.as_integer()
    }

    /// Adds a scored member to a sorted set.
    pub fn zadd(&mut self, key: &[u8], score: f64, member: &[u8]) -> Result<i64> {
        self.execute(Command::new("ZADD").arg(key).arg(score).arg(member))?
            .as_integer()
    }

    /// Removes a member from a sorted set.
    pub fn zrem(&mut self, key: &[u8], member: &[u8]) -> Result<i64> {
        self.execute(Command::new("ZREM").arg(key).arg(member))?
            .as_integer()
    }

    /// Rank of a member in a sorted set; `None` when absent.
    pub fn zrank(&mut self, key: &[u8], member: &[u8]) -> Result<Option<i64>> {
        self.execute(Command::new("ZRANK").arg(key).arg(member))?
            .as_optional_integer()
    }

    /// Reverse rank of a member in a sorted set; `None` when absent.
    pub fn zrevrank(&mut self, key: &[u8], member: &[u8]) -> Result<Option<i64>> {
        self.execute(Command::new("ZREVRANK").arg(key).arg(member))?
            .as_optional_integer()
    }

    /// Range of a sorted set by rank.
    pub fn zrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        bulk_list(&self.execute(Command::new("ZRANGE").arg(key).arg(start).arg(stop))?)
    }

    /// Cardinality of a sorted set.
    pub fn zcard(&mut self, key: &[u8]) -> Result<i64> {
        self.execute(Command::new("ZCARD").arg(key))?.as_integer()
    }

    /// Watches keys for the next transaction.
    pub fn watch(&mut self, keys: &[&[u8]]) -> Result<()> {
        self.execute(Command::new("WATCH").args(keys.iter().copied()))?
            .check_error()
    }

    /// Clears all watched keys.
    pub fn unwatch(&mut self) -> Result<()> {
        self.execute(Command::new("UNWATCH"))?.check_error()
    }

    /// Fetches server INFO output parsed into key/value pairs.
    pub fn info(&mut self) -> Result<HashMap<String, String>> {
        let text = self.execute(Command::new("INFO"))?.as_string()?;
        let mut info = HashMap::new();
        for line in text.split("\r\n") {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                info.insert(key.to_string(), value.to_string());
            }
        }
        Ok(info)
    }
}

// Hostnames resolve the same way they do for the async engine; every
// resolved address is tried before the connect is reported as failed.
fn connect_stream(config: &SessionConfig) -> Result<TcpStream> {
    let addrs = config
        .addr
        .to_socket_addrs()
        .map_err(|err| Error::Connection(format!("failed to resolve {:?}: {}", config.addr, err)))?;

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => Error::Connection(format!("failed to connect to {}: {}", config.addr, err)),
        None => Error::Connection(format!("no addresses found for {:?}", config.addr)),
    })
}

fn optional_bulk(reply: &Reply) -> Result<Option<Vec<u8>>> {
    if reply.is_nil() {
        return Ok(None);
    }
    Ok(Some(reply.as_bytes()?.to_vec()))
}

fn bulk_list(reply: &Reply) -> Result<Vec<Vec<u8>>> {
    let len = reply.len()?;
    let mut items = Vec::with_capacity(len);
    for index in 0..len {
        items.push(reply.at(index)?.as_bytes()?.to_vec());
    }
    Ok(items)
}
