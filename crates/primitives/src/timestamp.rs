//! Lamport timestamps.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a participating client.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for ClientId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A `(client, counter)` pair ordering a client's updates.
///
/// For a fixed client, counters form a strictly increasing contiguous
/// sequence beginning at 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LamportTimestamp {
    pub client: ClientId,
    pub counter: u64,
}

impl LamportTimestamp {
    #[must_use]
    pub const fn new(client: ClientId, counter: u64) -> Self {
        Self { client, counter }
    }

    /// The timestamp a client stamps on its next update.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            client: self.client,
            counter: self.counter + 1,
        }
    }
}

impl fmt::Display for LamportTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.client, self.counter)
    }
}
