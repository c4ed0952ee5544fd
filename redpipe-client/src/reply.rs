//! # Typed Reply Views
//!
//! Purpose: Wrap a parsed reply node in a shared-ownership handle and expose
//! typed accessors over it, including zero-copy views into array elements.
//!
//! ## Design Principles
//! 1. **Shared Root, Index Paths**: A view is (root handle, index path), so
//!    an element view structurally cannot outlive the reply that produced it
//!    and the underlying storage is released exactly once.
//! 2. **Check on Access**: Tag checks happen on every accessor call rather
//!    than once at construction; nodes are read-only and the check is a
//!    cheap branch, which keeps the type lazy and avoids a parallel typed
//!    hierarchy.
//! 3. **Errors Before Types**: Every typed accessor checks for an error
//!    reply first, so a server error surfaces as `Error::Remote` instead of
//!    a misleading type mismatch.

use std::str::FromStr;
use std::sync::Arc;

use redpipe_proto::ReplyNode;

use crate::error::{Error, Result};

/// Sentinel returned by [`Reply::as_bytes`] for nil replies.
pub const NIL: &[u8] = b"**NIL**";

/// A typed view over one server reply.
///
/// Cloning is cheap; clones and array-element views share the same
/// underlying node storage.
#[derive(Debug, Clone)]
pub struct Reply {
    root: Arc<ReplyNode>,
    path: Vec<usize>,
}

impl Reply {
    /// Wraps a freshly parsed node as an owning root reply.
    pub fn new(node: ReplyNode) -> Self {
        Reply {
            root: Arc::new(node),
            path: Vec::new(),
        }
    }

    /// The node this view addresses.
    fn node(&self) -> &ReplyNode {
        let mut node = self.root.as_ref();
        for &index in &self.path {
            match node {
                ReplyNode::Array(items) => node = &items[index],
                // `at` only ever extends the path through arrays with a
                // bounds check, so any other tag here is a bug.
                _ => unreachable!("view path addresses a non-array node"),
            }
        }
        node
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch {
            expected,
            actual: self.node().tag(),
        }
    }

    /// True when the reply is a server error.
    pub fn is_error(&self) -> bool {
        self.node().is_error()
    }

    /// True when the reply is nil.
    pub fn is_nil(&self) -> bool {
        self.node().is_nil()
    }

    /// The server's error text, or empty when the reply is not an error.
    pub fn error_message(&self) -> String {
        match self.node() {
            ReplyNode::Error(message) => message.clone(),
            _ => String::new(),
        }
    }

    /// Fails with [`Error::Remote`] when the reply is a server error.
    pub fn check_error(&self) -> Result<()> {
        match self.node() {
            ReplyNode::Error(message) => Err(Error::Remote(message.clone())),
            _ => Ok(()),
        }
    }

    /// The status line of a status reply.
    pub fn as_status(&self) -> Result<String> {
        self.check_error()?;
        match self.node() {
            ReplyNode::Status(text) => Ok(text.clone()),
            _ => Err(self.mismatch("status")),
        }
    }

    /// The payload of a bulk-string reply; nil yields the [`NIL`] sentinel.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.check_error()?;
        match self.node() {
            ReplyNode::Bulk(data) => Ok(data),
            ReplyNode::Nil => Ok(NIL),
            _ => Err(self.mismatch("bulk string")),
        }
    }

    /// UTF-8 form of [`Reply::as_bytes`].
    pub fn as_string(&self) -> Result<String> {
        let bytes = self.as_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Conversion("bulk string is not valid UTF-8".to_string()))
    }

    /// The value of an integer reply.
    pub fn as_integer(&self) -> Result<i64> {
        self.check_error()?;
        match self.node() {
            ReplyNode::Integer(value) => Ok(*value),
            _ => Err(self.mismatch("integer")),
        }
    }

    /// The value of an integer reply, or `None` for nil.
    pub fn as_optional_integer(&self) -> Result<Option<i64>> {
        self.check_error()?;
        match self.node() {
            ReplyNode::Integer(value) => Ok(Some(*value)),
            ReplyNode::Nil => Ok(None),
            _ => Err(self.mismatch("integer or nil")),
        }
    }

    /// Element count of an array reply.
    pub fn len(&self) -> Result<usize> {
        self.check_error()?;
        match self.node() {
            ReplyNode::Array(items) => Ok(items.len()),
            _ => Err(self.mismatch("array")),
        }
    }

    /// A non-owning view of the i-th array element.
    pub fn at(&self, index: usize) -> Result<Reply> {
        let len = self.len()?;
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        let mut path = self.path.clone();
        path.push(index);
        Ok(Reply {
            root: Arc::clone(&self.root),
            path,
        })
    }

    /// Parses the string form of the reply into `V`.
    pub fn to_value<V: FromStr>(&self) -> Result<V> {
        let text = self.as_string()?;
        text.parse()
            .map_err(|_| Error::Conversion(format!("cannot parse {:?}", text)))
    }

    /// Parses every array element's string form into `V`.
    pub fn to_vec<V: FromStr>(&self) -> Result<Vec<V>> {
        let len = self.len()?;
        let mut values = Vec::with_capacity(len);
        for index in 0..len {
            values.push(self.at(index)?.to_value()?);
        }
        Ok(values)
    }
}
