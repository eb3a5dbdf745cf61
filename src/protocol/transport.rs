//! The two-phase size-prefix-and-echo frame handshake every message exchange
//! uses (§4.4).

use std::io::{Read, Write};

use log::trace;

use super::buffer::ByteBuffer;
use super::message::{decode_message, encode_message, Message};
use super::scalar::{read_gamma_framed, write_gamma_framed, MAX_MESSAGE_SIZE};
use super::RpcError;

/// Sends one message: encode the body, write its size, confirm the peer
/// echoed the same size, then write the body.
///
/// Aborts without writing the body if the peer's echo disagrees, per §4.4 —
/// this is a cheap way to validate the framing header before committing to
/// a potentially large write/read on either side.
pub fn send_message<S: Read + Write>(stream: &mut S, msg: &Message) -> Result<(), RpcError> {
    let mut body = ByteBuffer::new(256);
    encode_message(&mut body, msg)?;

    let size = body.cursor() as u64;
    if size > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge {
            got: size,
            limit: MAX_MESSAGE_SIZE,
        });
    }

    write_gamma_framed(stream, size)?;

    let echoed = read_gamma_framed(stream)?;
    if echoed != size {
        return Err(RpcError::SizeMismatch {
            sent: size,
            echoed,
        });
    }

    stream.write_all(body.as_slice())?;
    trace!("sent {} byte message body", size);
    Ok(())
}

/// Receives one message: read the size header, echo it back, then read
/// exactly that many bytes and decode them.
pub fn receive_message<S: Read + Write>(stream: &mut S) -> Result<Message, RpcError> {
    let size = read_gamma_framed(stream)?;
    if size > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge {
            got: size,
            limit: MAX_MESSAGE_SIZE,
        });
    }

    write_gamma_framed(stream, size)?;

    let mut body = vec![0u8; size as usize];
    stream.read_exact(&mut body)?;
    trace!("received {} byte message body", size);

    let mut body = ByteBuffer::from_vec(body);
    decode_message(&mut body)
}
