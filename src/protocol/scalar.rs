//! Fixed-width integer and Elias-gamma length codecs.
//!
//! `Int32` values are logically 32-bit but travel the wire as 8-byte
//! big-endian integers, preserving the reference implementation's use of a
//! 64-bit writer over a 32-bit value (see the "historical drift" note in the
//! design docs). Lengths use Elias-gamma coding of `value + 1`, one bit per
//! byte, so that a length of zero is representable.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::RpcError;

/// The largest message body this protocol will ever frame.
pub const MAX_MESSAGE_SIZE: u64 = 1_000_000;

/// The fixed window every frame-level size header occupies on the wire,
/// regardless of how short the actual gamma encoding is. Sized to the gamma
/// length of [`MAX_MESSAGE_SIZE`]; shorter encodings are zero-padded after
/// the real bytes, which decodes cleanly since gamma decoding stops as soon
/// as it has read what it needs.
pub const FRAME_HEADER_LEN: usize = 39;

/// Writes a logically-32-bit integer as an 8-byte big-endian value.
pub fn write_int32<W: Write>(w: &mut W, value: i32) -> Result<(), RpcError> {
    w.write_i64::<BigEndian>(value as i64)?;
    Ok(())
}

/// Reads an 8-byte big-endian integer, truncating to its low 32 bits.
pub fn read_int32<R: Read>(r: &mut R) -> Result<i32, RpcError> {
    let v = r.read_i64::<BigEndian>()?;
    Ok(v as i32)
}

/// The number of bytes `write_gamma` would emit for `value`.
pub fn gamma_length(value: u64) -> usize {
    let x = value + 1;
    let bits = 64 - x.leading_zeros() as usize;
    2 * bits - 1
}

/// Writes `value` as Elias-gamma code of `value + 1`, one bit per byte, with
/// no padding.
pub fn write_gamma<W: Write>(w: &mut W, value: u64) -> Result<(), RpcError> {
    let x = value + 1;
    let bits = 64 - x.leading_zeros() as usize;

    for _ in 0..bits - 1 {
        w.write_u8(0x00)?;
    }
    w.write_u8(0x01)?;

    for i in (0..bits - 1).rev() {
        w.write_u8(((x >> i) & 1) as u8)?;
    }

    Ok(())
}

/// Reads an Elias-gamma code written by [`write_gamma`].
pub fn read_gamma<R: Read>(r: &mut R) -> Result<u64, RpcError> {
    let mut zero_count = 0u32;
    loop {
        match r.read_u8()? {
            0x00 => {
                zero_count += 1;
                if zero_count as usize >= FRAME_HEADER_LEN {
                    return Err(RpcError::Malformed(
                        "gamma unary prefix longer than the maximum frame size allows".into(),
                    ));
                }
            }
            0x01 => break,
            other => {
                return Err(RpcError::Malformed(format!(
                    "invalid gamma code byte 0x{other:02x}, expected 0x00 or 0x01"
                )))
            }
        }
    }

    let mut value: u64 = 1;
    for _ in 0..zero_count {
        let bit = r.read_u8()?;
        if bit > 1 {
            return Err(RpcError::Malformed(format!(
                "invalid gamma code bit 0x{bit:02x}, expected 0x00 or 0x01"
            )));
        }
        value = (value << 1) | bit as u64;
    }

    Ok(value - 1)
}

/// Writes `value`'s gamma encoding into a fixed [`FRAME_HEADER_LEN`]-byte
/// window, zero-padded after the real encoding. Used only for the
/// frame-level size header (§4.4); lengths embedded in a message body use
/// [`write_gamma`] directly.
pub fn write_gamma_framed<W: Write>(w: &mut W, value: u64) -> Result<(), RpcError> {
    let mut encoded = Vec::with_capacity(FRAME_HEADER_LEN);
    write_gamma(&mut encoded, value)?;

    let mut framed = [0u8; FRAME_HEADER_LEN];
    framed[..encoded.len()].copy_from_slice(&encoded);
    w.write_all(&framed)?;
    Ok(())
}

/// Reads a fixed [`FRAME_HEADER_LEN`]-byte size header written by
/// [`write_gamma_framed`].
pub fn read_gamma_framed<R: Read>(r: &mut R) -> Result<u64, RpcError> {
    let mut framed = [0u8; FRAME_HEADER_LEN];
    r.read_exact(&mut framed)?;
    read_gamma(&mut &framed[..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn int32_round_trip_extremes() {
        for n in [0, 1, -1, i32::MIN, i32::MAX, -12345, 12345] {
            let mut buf = Vec::new();
            write_int32(&mut buf, n).unwrap();
            assert_eq!(buf.len(), 8);
            let got = read_int32(&mut Cursor::new(buf)).unwrap();
            assert_eq!(got, n);
        }
    }

    #[test]
    fn gamma_round_trip_and_length_formula() {
        for v in 0..2000u64 {
            let mut buf = Vec::new();
            write_gamma(&mut buf, v).unwrap();
            assert_eq!(buf.len(), gamma_length(v));

            let expected_len = 2 * ((v + 1) as f64).log2().floor() as usize + 1;
            assert_eq!(buf.len(), expected_len, "mismatch for v={v}");

            let got = read_gamma(&mut Cursor::new(buf)).unwrap();
            assert_eq!(got, v);
        }
    }

    #[test]
    fn gamma_round_trip_at_max_message_size() {
        let mut buf = Vec::new();
        write_gamma(&mut buf, MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(buf.len(), FRAME_HEADER_LEN);
        assert_eq!(read_gamma(&mut Cursor::new(buf)).unwrap(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn framed_gamma_is_fixed_width_and_tolerates_padding() {
        let mut buf = Vec::new();
        write_gamma_framed(&mut buf, 5).unwrap();
        assert_eq!(buf.len(), FRAME_HEADER_LEN);
        assert_eq!(read_gamma_framed(&mut Cursor::new(buf)).unwrap(), 5);
    }

    #[test]
    fn gamma_rejects_invalid_bytes() {
        let bad = vec![0x02];
        assert!(read_gamma(&mut Cursor::new(bad)).is_err());
    }
}
