//! Encrypted update frames.

use bytes::{BufMut, Bytes, BytesMut};
use veil_primitives::{ClientId, LamportTimestamp, MessageId, SnapshotId};

use crate::varint::{
    read_bytes, read_varstring, read_varuint, write_bytes, write_varstring, write_varuint,
};
use crate::{check_version, CodecError, PROTOCOL_VERSION};

const KIND_UPDATES: u8 = 0;
const KIND_SNAPSHOT: u8 = 1;

/// One encrypted operational update, layered on a snapshot.
///
/// `server_version` is absent until the server accepts the update and echoes
/// it back with its assigned position in the per-snapshot log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateRecord {
    pub snapshot_id: SnapshotId,
    pub client: ClientId,
    pub counter: u64,
    pub server_version: Option<u64>,
    pub payload: Bytes,
}

impl UpdateRecord {
    #[must_use]
    pub fn timestamp(&self) -> LamportTimestamp {
        LamportTimestamp::new(self.client, self.counter)
    }

    /// Content address of the ciphertext payload.
    #[must_use]
    pub fn message_id(&self) -> MessageId {
        MessageId::of(&self.payload)
    }

    pub(crate) fn encode_to(&self, buf: &mut BytesMut) {
        write_varstring(buf, self.snapshot_id.as_str());
        write_varuint(buf, self.client.0);
        write_varuint(buf, self.counter);

        match self.server_version {
            Some(version) => {
                buf.put_u8(1);
                write_varuint(buf, version);
            }
            None => buf.put_u8(0),
        }

        write_bytes(buf, &self.payload);
    }

    pub(crate) fn decode_from(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let snapshot_id = read_varstring(buf)?;

        if snapshot_id.is_empty() {
            return Err(CodecError::InvalidFrame("update without snapshot id"));
        }

        let client = ClientId(read_varuint(buf)?);
        let counter = read_varuint(buf)?;

        let server_version = match take_u8(buf)? {
            0 => None,
            1 => Some(read_varuint(buf)?),
            _ => return Err(CodecError::InvalidFrame("invalid server version flag")),
        };

        let payload = read_bytes(buf)?;

        Ok(Self {
            snapshot_id: snapshot_id.into(),
            client,
            counter,
            server_version,
            payload,
        })
    }
}

/// A full-document snapshot superseding its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotFrame {
    pub id: SnapshotId,
    pub parent_id: Option<SnapshotId>,
    pub payload: Bytes,
}

impl SnapshotFrame {
    pub(crate) fn encode_to(&self, buf: &mut BytesMut) {
        write_varstring(buf, self.id.as_str());
        write_varstring(buf, self.parent_id.as_ref().map_or("", SnapshotId::as_str));
        write_bytes(buf, &self.payload);
    }

    pub(crate) fn decode_from(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let id = read_varstring(buf)?;

        if id.is_empty() {
            return Err(CodecError::InvalidFrame("snapshot without id"));
        }

        let parent_id = read_varstring(buf)?;
        let payload = read_bytes(buf)?;

        Ok(Self {
            id: id.into(),
            parent_id: (!parent_id.is_empty()).then(|| SnapshotId::from(parent_id)),
            payload,
        })
    }
}

/// The encrypted update frame: either a batch of updates or a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateFrame {
    Updates(Vec<UpdateRecord>),
    Snapshot(SnapshotFrame),
}

impl UpdateFrame {
    pub fn encode_to(&self, buf: &mut BytesMut) {
        write_varuint(buf, PROTOCOL_VERSION);

        match self {
            Self::Updates(updates) => {
                buf.put_u8(KIND_UPDATES);
                write_varuint(buf, updates.len() as u64);

                for update in updates {
                    update.encode_to(buf);
                }
            }
            Self::Snapshot(snapshot) => {
                buf.put_u8(KIND_SNAPSHOT);
                snapshot.encode_to(buf);
            }
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

        match take_u8(buf)? {
            KIND_UPDATES => {
                let len = read_varuint(buf)?;
                let mut updates = Vec::new();

                for _ in 0..len {
                    updates.push(UpdateRecord::decode_from(buf)?);
                }

                Ok(Self::Updates(updates))
            }
            KIND_SNAPSHOT => Ok(Self::Snapshot(SnapshotFrame::decode_from(buf)?)),
            _ => Err(CodecError::InvalidFrame("unknown update frame kind")),
        }
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

pub(crate) fn take_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    let Some((&byte, rest)) = buf.split_first() else {
        return Err(CodecError::TRUNCATED);
    };
    *buf = rest;

    Ok(byte)
}
