//! # Parsed Reply Nodes
//!
//! Purpose: Represent one decoded RESP2 server reply as an immutable tree.
//!
//! A node is produced once by the codec and never mutated afterwards; the
//! client crate wraps it in a shared-ownership handle and hands out views
//! into array elements.

/// One parsed RESP2 reply.
///
/// Both the nil bulk string (`$-1`) and the nil array (`*-1`) decode to
/// [`ReplyNode::Nil`], mirroring how servers use them interchangeably to
/// signal absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyNode {
    /// +OK or +PONG style status line.
    Status(String),
    /// -ERR ... error line, message without the leading dash.
    Error(String),
    /// :123 integer reply.
    Integer(i64),
    /// $... bulk string payload (binary-safe).
    Bulk(Vec<u8>),
    /// $-1 or *-1 absent value.
    Nil,
    /// *... array of nested replies.
    Array(Vec<ReplyNode>),
}

impl ReplyNode {
    /// Human-readable tag name, used in type-mismatch errors.
    pub fn tag(&self) -> &'static str {
        match self {
            ReplyNode::Status(_) => "status",
            ReplyNode::Error(_) => "error",
            ReplyNode::Integer(_) => "integer",
            ReplyNode::Bulk(_) => "bulk string",
            ReplyNode::Nil => "nil",
            ReplyNode::Array(_) => "array",
        }
    }

    /// Returns true for error replies.
    pub fn is_error(&self) -> bool {
        matches!(self, ReplyNode::Error(_))
    }

    /// Returns true for nil replies.
    pub fn is_nil(&self) -> bool {
        matches!(self, ReplyNode::Nil)
    }
}
