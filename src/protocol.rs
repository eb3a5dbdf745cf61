//! The wire protocol: byte buffer, scalar codec, message codec, and frame
//! transport (§4.1-§4.4).

mod buffer;
mod error;
mod message;
mod scalar;
mod transport;

pub use buffer::ByteBuffer;
pub use error::RpcError;
pub use message::{Message, Operation, Payload, MAX_NAME_LEN};
pub use scalar::{gamma_length, read_gamma, read_int32, write_gamma, write_int32, MAX_MESSAGE_SIZE};
pub use transport::{receive_message, send_message};
