//! Shared shapes for tracking which messages a peer has observed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::MessageId;
use crate::timestamp::ClientId;

/// What a peer has observed, exactly: per client, counter → content address.
///
/// Gaps are permitted; a client's entries need not be contiguous.
pub type SeenMessages = BTreeMap<ClientId, BTreeMap<u64, MessageId>>;

/// Lossy per-client summary: the greatest counter observed. Gaps below the
/// maximum are invisible to this form.
pub type LamportStateVector = BTreeMap<ClientId, u64>;

/// Per-client run-length ranges without the side table.
///
/// This is the only range view that travels on the wire; message ids never
/// do.
pub type SeenRanges = BTreeMap<ClientId, Vec<CounterRange>>;

/// An inclusive run of consecutive counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRange {
    pub start: u64,
    pub end: u64,
}

impl CounterRange {
    #[must_use]
    pub const fn contains(&self, counter: u64) -> bool {
        self.start <= counter && counter <= self.end
    }
}
