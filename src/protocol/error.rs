//! The error type shared by the wire codec, transport, and dispatch layers.

use thiserror::Error;

/// A protocol-level or transport-level failure.
///
/// Every fallible operation below the public `find`/`call` entry points
/// returns this, rather than a null or sentinel value; the public entry
/// points collapse it into an absent result after logging, per the
/// connection-continues failure model.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The underlying socket or stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer echoed back a different size than was sent during the frame
    /// handshake.
    #[error("frame size echo mismatch: sent {sent} bytes, peer echoed {echoed}")]
    SizeMismatch {
        /// The size this side sent.
        sent: u64,
        /// The size the peer echoed back.
        echoed: u64,
    },

    /// The message body exceeds the fixed upper bound.
    #[error("message body of {got} bytes exceeds the {limit}-byte limit")]
    MessageTooLarge {
        /// The size that was rejected.
        got: u64,
        /// The configured limit.
        limit: u64,
    },

    /// The decoded bytes don't form a well-formed payload, message, or
    /// scalar.
    #[error("malformed wire data: {0}")]
    Malformed(String),

    /// An operation tag outside the known set of four was read from the
    /// wire.
    #[error("unknown operation tag: {0}")]
    UnknownOperation(i32),

    /// A handler name violates the `1..=1000` byte length constraint.
    #[error("handler name must be 1..=1000 bytes, got {0}")]
    InvalidHandlerName(usize),
}
