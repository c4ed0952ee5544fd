// redpipe-proto - Wire-level types for the redpipe Redis client
//
// This crate defines the parsed reply tree, the command argument vector,
// and the RESP2 encoder/decoder shared by the sync and async clients.

pub mod codec;
pub mod command;
pub mod node;

// Re-export for convenience
pub use codec::*;
pub use command::*;
pub use node::*;
