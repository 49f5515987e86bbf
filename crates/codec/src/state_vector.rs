//! Snapshot-mode state vectors.

use bytes::{Bytes, BytesMut};
use veil_primitives::SnapshotId;

use crate::varint::{read_varstring, read_varuint, write_varstring, write_varuint};
use crate::{check_version, CodecError, PROTOCOL_VERSION};

/// "I have snapshot S and applied updates through server version V."
///
/// The empty form (no snapshot, version 0) is what a client advertises on
/// its very first sync of a document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateVector {
    pub snapshot_id: Option<SnapshotId>,
    pub server_version: u64,
}

impl StateVector {
    #[must_use]
    pub const fn new(snapshot_id: Option<SnapshotId>, server_version: u64) -> Self {
        Self {
            snapshot_id,
            server_version,
        }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self {
            snapshot_id: None,
            server_version: 0,
        }
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        write_varuint(buf, PROTOCOL_VERSION);
        write_varstring(buf, self.snapshot_id.as_ref().map_or("", SnapshotId::as_str));
        write_varuint(buf, self.server_version);
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf);
        buf.freeze()
    }

    pub fn decode_from(buf: &mut &[u8]) -> Result<Self, CodecError> {
        check_version(read_varuint(buf)?)?;

        let snapshot_id = read_varstring(buf)?;
        let server_version = read_varuint(buf)?;

        let snapshot_id = (!snapshot_id.is_empty()).then(|| SnapshotId::from(snapshot_id));

        if snapshot_id.is_none() && server_version != 0 {
            return Err(CodecError::InvalidFrame("server version without snapshot"));
        }

        Ok(Self {
            snapshot_id,
            server_version,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut buf = bytes;
        let vector = Self::decode_from(&mut buf)?;

        if !buf.is_empty() {
            return Err(CodecError::InvalidFrame("trailing bytes after frame"));
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let vector = StateVector::new(Some("S0".into()), 42);

        assert_eq!(StateVector::decode(&vector.encode()).unwrap(), vector);
    }

    #[test]
    fn test_empty_roundtrip() {
        let vector = StateVector::empty();
        let encoded = vector.encode();

        // version 0, empty string, version 0
        assert_eq!(&encoded[..], &[0, 0, 0]);
        assert_eq!(StateVector::decode(&encoded).unwrap(), vector);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = StateVector::empty().encode().to_vec();
        bytes[0] = 1;

        assert_eq!(
            StateVector::decode(&bytes),
            Err(CodecError::InvalidFrame("unsupported protocol version"))
        );
    }

    #[test]
    fn test_rejects_version_without_snapshot() {
        // version 0, empty snapshot id, server version 7
        let bytes = [0, 0, 7];

        assert_eq!(
            StateVector::decode(&bytes),
            Err(CodecError::InvalidFrame("server version without snapshot"))
        );
    }
}
