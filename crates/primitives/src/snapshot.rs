//! Snapshot identifiers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a full-document snapshot.
///
/// Content-derived by whoever encrypts the snapshot; the protocol only ever
/// compares these for equality. The empty string stands for "no snapshot" on
/// the wire, so it is not a valid identifier of an actual snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Box<str>);

impl SnapshotId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SnapshotId {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

impl From<&str> for SnapshotId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl AsRef<str> for SnapshotId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
