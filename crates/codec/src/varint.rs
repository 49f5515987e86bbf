//! LEB128 primitives shared by every frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::CodecError;

/// Longest possible LEB128 encoding of a u64.
const MAX_VARUINT_LEN: usize = 10;

pub fn write_varuint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;

        if value == 0 {
            buf.put_u8(byte);
            return;
        }

        buf.put_u8(byte | 0x80);
    }
}

pub fn read_varuint(buf: &mut &[u8]) -> Result<u64, CodecError> {
    let mut value: u64 = 0;

    for shift in 0..MAX_VARUINT_LEN {
        let Some((&byte, rest)) = buf.split_first() else {
            return Err(CodecError::TRUNCATED);
        };
        *buf = rest;

        let group = u64::from(byte & 0x7f);

        // The tenth byte may only carry the single remaining bit of a u64.
        if shift == MAX_VARUINT_LEN - 1 && byte > 0x01 {
            return Err(CodecError::InvalidFrame("varuint overflows u64"));
        }

        value |= group << (shift * 7);

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(CodecError::InvalidFrame("varuint overflows u64"))
}

pub fn write_varstring(buf: &mut BytesMut, value: &str) {
    write_varuint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

pub fn read_varstring(buf: &mut &[u8]) -> Result<String, CodecError> {
    let raw = read_raw(buf)?;

    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidFrame("string is not UTF-8"))
}

pub fn write_bytes(buf: &mut BytesMut, value: &[u8]) {
    write_varuint(buf, value.len() as u64);
    buf.put_slice(value);
}

pub fn read_bytes(buf: &mut &[u8]) -> Result<Bytes, CodecError> {
    read_raw(buf).map(Bytes::copy_from_slice)
}

fn read_raw<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    let len = read_varuint(buf)?;

    let len = usize::try_from(len).map_err(|_| CodecError::InvalidFrame("length out of range"))?;

    if buf.len() < len {
        return Err(CodecError::TRUNCATED);
    }

    let (taken, rest) = buf.split_at(len);
    *buf = rest;

    Ok(taken)
}
