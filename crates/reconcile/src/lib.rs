//! Range-based reconciliation of seen messages.
//!
//! Peers in Lamport mode track which `(client, counter)` pairs they have
//! observed, keyed to the content address of each message. This crate
//! compresses those observations into run-length counter ranges, computes
//! set differences against a remote peer's view (exact, against a ranges
//! frame, or lossy, against a max-counter summary), and merges incoming
//! views back in.
//!
//! Everything here is pure: no I/O, no clocks, no allocation beyond the
//! returned structures.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use veil_primitives::{ClientId, MessageId};

pub use veil_primitives::{CounterRange, LamportStateVector, SeenMessages, SeenRanges};

/// One element of a computed difference, in ascending `(client, counter)`
/// order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub client: ClientId,
    pub counter: u64,
    pub message_id: MessageId,
}

/// Run-length compressed view of [`SeenMessages`].
///
/// Per client: an ascending list of non-overlapping, non-adjacent inclusive
/// ranges, plus the counter → message-id side table. The union of the ranges
/// always equals the domain of the side table; both are rebuilt together.
/// Only the ranges half ever leaves the process (see
/// [`RangeBasedSeen::to_ranges`]) — message ids are recomputed from payloads
/// by whoever holds them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBasedSeen {
    ranges: SeenRanges,
    messages: SeenMessages,
}

impl RangeBasedSeen {
    /// Compresses an exact view. Clients with no messages are omitted.
    #[must_use]
    pub fn from_seen(seen: &SeenMessages) -> Self {
        let mut ranges = SeenRanges::new();

        for (&client, counters) in seen {
            if counters.is_empty() {
                continue;
            }

            let _ = ranges.insert(client, coalesce(counters.keys().copied()));
        }

        let messages = seen
            .iter()
            .filter(|(_, counters)| !counters.is_empty())
            .map(|(&client, counters)| (client, counters.clone()))
            .collect();

        Self { ranges, messages }
    }

    /// Expands back into the exact view.
    ///
    /// A counter covered by a range but absent from the side table is
    /// silently dropped. That state is a structural invariant violation
    /// upstream — nothing in this crate produces it.
    #[must_use]
    pub fn to_seen(&self) -> SeenMessages {
        let mut seen = SeenMessages::new();

        for (&client, ranges) in &self.ranges {
            let Some(table) = self.messages.get(&client) else {
                continue;
            };

            let mut counters = BTreeMap::new();

            for range in ranges {
                for counter in range.start..=range.end {
                    if let Some(message_id) = table.get(&counter) {
                        let _ = counters.insert(counter, message_id.clone());
                    }
                }
            }

            if !counters.is_empty() {
                let _ = seen.insert(client, counters);
            }
        }

        seen
    }

    /// The ranges half alone — the only view that may be serialized.
    #[must_use]
    pub fn to_ranges(&self) -> SeenRanges {
        self.ranges.clone()
    }

    /// Records one observation and rebuilds the client's ranges.
    ///
    /// Idempotent on duplicate counters: both sides are content addresses of
    /// the same bytes, so the last write changes nothing.
    pub fn insert(&mut self, client: ClientId, counter: u64, message_id: MessageId) {
        let table = self.messages.entry(client).or_default();
        let _ = table.insert(counter, message_id);

        let _ = self.ranges.insert(client, coalesce(table.keys().copied()));
    }

    /// Merges every observation from `incoming`, rebuilding ranges once per
    /// affected client.
    pub fn merge(&mut self, incoming: &Self) {
        for (&client, counters) in &incoming.messages {
            if counters.is_empty() {
                continue;
            }

            let table = self.messages.entry(client).or_default();

            for (&counter, message_id) in counters {
                let _ = table.insert(counter, message_id.clone());
            }

            let _ = self.ranges.insert(client, coalesce(table.keys().copied()));
        }
    }

    #[must_use]
    pub fn ranges(&self, client: ClientId) -> &[CounterRange] {
        self.ranges.get(&client).map_or(&[], Vec::as_slice)
    }

    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.ranges.keys().copied()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Everything in `local` that `remote`'s ranges do not cover.
///
/// Clients absent from `remote` yield all their local counters. Counters
/// present on both sides are omitted. O(N + M) per client, N and M being the
/// total counter counts on each side.
#[must_use]
pub fn compute_set_difference(local: &SeenMessages, remote: &SeenRanges) -> Vec<DiffEntry> {
    let mut diff = Vec::new();

    for (&client, counters) in local {
        let covered: HashSet<u64> = remote
            .get(&client)
            .into_iter()
            .flatten()
            .flat_map(|range| range.start..=range.end)
            .collect();

        for (&counter, message_id) in counters {
            if !covered.contains(&counter) {
                diff.push(DiffEntry {
                    client,
                    counter,
                    message_id: message_id.clone(),
                });
            }
        }
    }

    diff
}

/// Lossy variant against a max-counter summary: everything in `local`
/// strictly greater than the remote maximum for that client (clients absent
/// from the vector yield all their counters).
///
/// If the remote has gaps below its maximum, those counters are *not*
/// resent; callers trade precision for payload size.
#[must_use]
pub fn compute_set_difference_from_state_vector(
    local: &SeenMessages,
    remote: &LamportStateVector,
) -> Vec<DiffEntry> {
    let mut diff = Vec::new();

    for (&client, counters) in local {
        let remote_max = remote.get(&client).copied();

        for (&counter, message_id) in counters {
            if remote_max.map_or(true, |max| counter > max) {
                diff.push(DiffEntry {
                    client,
                    counter,
                    message_id: message_id.clone(),
                });
            }
        }
    }

    diff
}

/// Coalesces an ascending counter sequence into inclusive ranges.
fn coalesce(counters: impl Iterator<Item = u64>) -> Vec<CounterRange> {
    let mut ranges: Vec<CounterRange> = Vec::new();

    for counter in counters {
        match ranges.last_mut() {
            Some(last) if counter == last.end + 1 => last.end = counter,
            _ => ranges.push(CounterRange {
                start: counter,
                end: counter,
            }),
        }
    }

    ranges
}
