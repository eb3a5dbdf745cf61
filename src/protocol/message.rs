//! The payload, message, and operation types, and their wire serialization.

use std::io::{Read, Write};

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::scalar::{read_gamma, read_int32, write_gamma, write_int32, MAX_MESSAGE_SIZE};
use super::RpcError;

/// The longest a handler or function name may be, in bytes, not counting the
/// trailing null the wire format adds.
pub const MAX_NAME_LEN: usize = 1000;

/// The four message kinds the wire protocol knows about. Any other tag value
/// read from the wire is a malformed-stream error.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum Operation {
    /// Ask whether a handler is registered under a name.
    FindRequest = 0,
    /// Invoke a handler by name with a payload.
    CallRequest = 1,
    /// A successful reply to a find or call.
    ReplySuccess = 2,
    /// A failed reply to a find or call.
    ReplyFailure = 3,
}

/// The `(data1, data2)` pair exchanged in every request and reply.
///
/// Modeled as a sum type rather than a `(length, pointer)` pair so that
/// `data2_len == 0 ⇔ data2 absent` is enforced by the type itself: there is
/// no way to construct a `Payload` that violates it. Wire-level violations
/// (a decoded stream that implies a mismatched length) are caught in
/// [`decode_payload`] before a `Payload` value ever comes into being.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// The signed 32-bit scalar half of the payload.
    pub data1: i32,
    /// The variable-length half of the payload, or absent.
    pub data2: Option<Vec<u8>>,
}

impl Payload {
    /// A payload carrying only `data1`, with no trailing bytes.
    pub fn scalar(data1: i32) -> Self {
        Payload { data1, data2: None }
    }

    /// The empty payload used for `FindRequest` (`data1=0, data2` absent).
    pub fn empty() -> Self {
        Payload {
            data1: 0,
            data2: None,
        }
    }
}

/// A single request or reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Echoed by the responder; used only for caller-side correlation.
    pub request_id: i32,
    /// The kind of message this is.
    pub operation: Operation,
    /// The handler name this message concerns.
    pub function_name: String,
    /// The request or reply payload.
    pub data: Payload,
}

pub(crate) fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), RpcError> {
    if s.is_empty() || s.len() > MAX_NAME_LEN {
        return Err(RpcError::InvalidHandlerName(s.len()));
    }

    // Length prefix counts the trailing null the wire format appends.
    write_gamma(w, (s.len() + 1) as u64)?;
    w.write_all(s.as_bytes())?;
    w.write_all(&[0u8])?;
    Ok(())
}

pub(crate) fn read_string<R: Read>(r: &mut R) -> Result<String, RpcError> {
    let len = read_gamma(r)?;
    if len == 0 {
        return Err(RpcError::Malformed(
            "string length prefix must include the trailing null".into(),
        ));
    }

    let name_len = (len - 1) as usize;
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(RpcError::InvalidHandlerName(name_len));
    }

    let mut bytes = vec![0u8; name_len];
    r.read_exact(&mut bytes)?;

    let mut terminator = [0u8; 1];
    r.read_exact(&mut terminator)?;
    if terminator[0] != 0 {
        return Err(RpcError::Malformed(
            "string is not null-terminated on the wire".into(),
        ));
    }

    String::from_utf8(bytes).map_err(|e| RpcError::Malformed(e.to_string()))
}

pub(crate) fn write_payload<W: Write>(w: &mut W, data: &Payload) -> Result<(), RpcError> {
    write_int32(w, data.data1)?;

    match &data.data2 {
        None => write_gamma(w, 0)?,
        Some(bytes) => {
            write_gamma(w, bytes.len() as u64)?;
            w.write_all(bytes)?;
        }
    }

    Ok(())
}

pub(crate) fn read_payload<R: Read>(r: &mut R) -> Result<Payload, RpcError> {
    let data1 = read_int32(r)?;
    let data2_len = read_gamma(r)?;

    let data2 = if data2_len == 0 {
        None
    } else {
        // `data2_len` comes straight off the wire and is otherwise only
        // bounded by `read_gamma`'s 39-zero-byte guard, which still allows
        // values far past the whole message's own size limit. Reject it
        // before allocating rather than trusting it to size a `Vec`.
        if data2_len > MAX_MESSAGE_SIZE {
            return Err(RpcError::Malformed(format!(
                "data2_len {data2_len} exceeds the {MAX_MESSAGE_SIZE}-byte message limit"
            )));
        }

        let mut bytes = vec![0u8; data2_len as usize];
        r.read_exact(&mut bytes)?;
        Some(bytes)
    };

    Ok(Payload { data1, data2 })
}

/// Serializes a message body: `request_id · operation · function_name ·
/// data`. Does not include the frame-level size header; see
/// [`super::transport`].
pub fn encode_message<W: Write>(w: &mut W, msg: &Message) -> Result<(), RpcError> {
    write_int32(w, msg.request_id)?;
    write_int32(w, msg.operation as i32)?;
    write_string(w, &msg.function_name)?;
    write_payload(w, &msg.data)?;
    Ok(())
}

/// Deserializes a message body written by [`encode_message`].
pub fn decode_message<R: Read>(r: &mut R) -> Result<Message, RpcError> {
    let request_id = read_int32(r)?;

    let op_tag = read_int32(r)?;
    let operation =
        Operation::from_i32(op_tag).ok_or(RpcError::UnknownOperation(op_tag))?;

    let function_name = read_string(r)?;
    let data = read_payload(r)?;

    Ok(Message {
        request_id,
        operation,
        function_name,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn round_trip(msg: &Message) -> Message {
        let mut buf = Vec::new();
        encode_message(&mut buf, msg).unwrap();
        decode_message(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn message_round_trip_with_data2() {
        let msg = Message {
            request_id: 42,
            operation: Operation::CallRequest,
            function_name: "add2".to_string(),
            data: Payload {
                data1: 1,
                data2: Some(vec![100]),
            },
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn message_round_trip_without_data2() {
        let msg = Message {
            request_id: -7,
            operation: Operation::ReplySuccess,
            function_name: "sub2".to_string(),
            data: Payload::scalar(3),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn decode_rejects_unknown_operation_tag() {
        let mut buf = Vec::new();
        write_int32(&mut buf, 0).unwrap();
        write_int32(&mut buf, 99).unwrap();
        write_string(&mut buf, "x").unwrap();
        write_payload(&mut buf, &Payload::empty()).unwrap();

        let err = decode_message(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, RpcError::UnknownOperation(99)));
    }

    #[test]
    fn decode_rejects_truncated_data2() {
        let mut buf = Vec::new();
        write_int32(&mut buf, 0).unwrap();
        write_int32(&mut buf, Operation::CallRequest as i32).unwrap();
        write_string(&mut buf, "x").unwrap();
        write_int32(&mut buf, 0).unwrap();
        write_gamma(&mut buf, 3).unwrap();
        // Declares 3 trailing bytes but supplies none: this is the wire-level
        // realization of scenario 5's malformed payload, since `Payload`'s
        // type can't represent the mismatch directly.
        assert!(decode_message(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn name_length_is_enforced_symmetrically() {
        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        let mut buf = Vec::new();
        assert!(write_string(&mut buf, &too_long).is_err());
    }

    #[test]
    fn decode_rejects_oversize_data2_len_before_allocating() {
        let mut buf = Vec::new();
        write_int32(&mut buf, 0).unwrap();
        write_int32(&mut buf, Operation::CallRequest as i32).unwrap();
        write_string(&mut buf, "x").unwrap();
        write_int32(&mut buf, 0).unwrap();
        // Declares a `data2_len` past the whole message's own size limit,
        // with no trailing bytes to back it. If this were trusted to size a
        // `Vec` before the bound check, it would attempt a multi-gigabyte
        // allocation instead of failing cleanly.
        write_gamma(&mut buf, MAX_MESSAGE_SIZE + 1).unwrap();

        let err = decode_message(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, RpcError::Malformed(_)));
    }
}
