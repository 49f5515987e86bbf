//! Lamport-mode reconciliation frames.
//!
//! Peer-to-peer documents advertise either a lossy max-counter summary or an
//! exact ranges view. Both travel without message ids; receivers recompute
//! those from payload bytes.

use bytes::{Bytes, BytesMut};
use veil_primitives::{ClientId, CounterRange, LamportStateVector, SeenRanges};

use crate::varint::{read_varuint, write_varuint};
use crate::{check_version, CodecError, PROTOCOL_VERSION};

/// `client → max counter`, one entry per client, ascending client order.
#[must_use]
pub fn encode_state_vector(vector: &LamportStateVector) -> Bytes {
    let mut buf = BytesMut::new();
    write_varuint(&mut buf, PROTOCOL_VERSION);
    write_varuint(&mut buf, vector.len() as u64);

    for (&client, &max_counter) in vector {
        write_varuint(&mut buf, client.0);
        write_varuint(&mut buf, max_counter);
    }

    buf.freeze()
}

pub fn decode_state_vector(bytes: &[u8]) -> Result<LamportStateVector, CodecError> {
    let mut buf = bytes;
    check_version(read_varuint(&mut buf)?)?;

    let len = read_varuint(&mut buf)?;
    let mut vector = LamportStateVector::new();

    for _ in 0..len {
        let client = ClientId(read_varuint(&mut buf)?);
        let max_counter = read_varuint(&mut buf)?;

        if vector.insert(client, max_counter).is_some() {
            return Err(CodecError::InvalidFrame("duplicate client in state vector"));
        }
    }

    if !buf.is_empty() {
        return Err(CodecError::InvalidFrame("trailing bytes after frame"));
    }

    Ok(vector)
}

/// Per client: range count, then inclusive `(start, end)` pairs in ascending
/// order.
#[must_use]
pub fn encode_seen_ranges(ranges: &SeenRanges) -> Bytes {
    let mut buf = BytesMut::new();
    write_varuint(&mut buf, PROTOCOL_VERSION);
    write_varuint(&mut buf, ranges.len() as u64);

    for (&client, runs) in ranges {
        write_varuint(&mut buf, client.0);
        write_varuint(&mut buf, runs.len() as u64);

        for run in runs {
            write_varuint(&mut buf, run.start);
            write_varuint(&mut buf, run.end);
        }
    }

    buf.freeze()
}

pub fn decode_seen_ranges(bytes: &[u8]) -> Result<SeenRanges, CodecError> {
    let mut buf = bytes;
    check_version(read_varuint(&mut buf)?)?;

    let clients = read_varuint(&mut buf)?;
    let mut ranges = SeenRanges::new();

    for _ in 0..clients {
        let client = ClientId(read_varuint(&mut buf)?);
        let runs = read_varuint(&mut buf)?;

        let mut client_ranges = Vec::new();

        for _ in 0..runs {
            let start = read_varuint(&mut buf)?;
            let end = read_varuint(&mut buf)?;

            if end < start {
                return Err(CodecError::InvalidFrame("inverted counter range"));
            }

            if let Some(previous) = client_ranges.last() {
                let CounterRange { end: prev_end, .. } = *previous;

                // Ranges must stay ascending and non-adjacent.
                if start <= prev_end + 1 {
                    return Err(CodecError::InvalidFrame("overlapping counter ranges"));
                }
            }

            client_ranges.push(CounterRange { start, end });
        }

        if ranges.insert(client, client_ranges).is_some() {
            return Err(CodecError::InvalidFrame("duplicate client in ranges"));
        }
    }

    if !buf.is_empty() {
        return Err(CodecError::InvalidFrame("trailing bytes after frame"));
    }

    Ok(ranges)
}
