//! Sync-step-2 frames: the "missing content" half of a pull sync.

use bytes::{BufMut, Bytes, BytesMut};

use crate::update::{take_u8, SnapshotFrame, UpdateRecord};
use crate::varint::{read_varuint, write_varuint};
use crate::{check_version, CodecError, PROTOCOL_VERSION};

/// Everything a peer was missing: optionally a full snapshot, then the
/// updates layered on it, in log order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStep2Frame {
    pub snapshot: Option<SnapshotFrame>,
    pub updates: Vec<UpdateRecord>,
}

impl SyncStep2Frame {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.updates.is_empty()
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        write_varuint(buf, PROTOCOL_VERSION);

        match &self.snapshot {
            Some(snapshot) => {
                buf.put_u8(1);
                snapshot.encode_to(buf);
            }
            None => buf.put_u8(0),
        }

        write_varuint(buf, self.updates.len() as u64);

        for update in &self.updates {
            update.encode_to(buf);
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf);
        buf.freeze()
    }

    pub fn decode_from(buf: &mut &[u8]) -> Result<Self, CodecError> {
        check_version(read_varuint(buf)?)?;

        let snapshot = match take_u8(buf)? {
            0 => None,
            1 => Some(SnapshotFrame::decode_from(buf)?),
            _ => return Err(CodecError::InvalidFrame("invalid snapshot flag")),
        };

        let len = read_varuint(buf)?;
        let mut updates = Vec::new();

        for _ in 0..len {
            updates.push(UpdateRecord::decode_from(buf)?);
        }

        Ok(Self { snapshot, updates })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut buf = bytes;
        let frame = Self::decode_from(&mut buf)?;

        if !buf.is_empty() {
            return Err(CodecError::InvalidFrame("trailing bytes after frame"));
        }

        Ok(frame)
    }
}
