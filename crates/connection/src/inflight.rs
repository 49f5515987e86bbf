//! Tracking of sent messages awaiting acknowledgement.

use std::collections::HashMap;
use std::time::Instant;

use tracing::warn;
use veil_codec::Message;
use veil_primitives::MessageId;

/// One sent message awaiting its ACK.
#[derive(Clone, Debug)]
pub struct InFlightEntry {
    pub message_id: MessageId,
    pub sent_at: Instant,
    pub message: Message,
}

/// Messages sent but not yet acknowledged, keyed by content address.
///
/// Only trackable kinds enter (document, file, request/response); ACKs,
/// awareness, and pings never do. A buffered message enters at the moment
/// it is actually transmitted, not when it was enqueued.
#[derive(Debug, Default)]
pub(crate) struct InFlightTracker {
    entries: HashMap<MessageId, InFlightEntry>,
}

impl InFlightTracker {
    /// Records a transmitted message. Returns its id when it was tracked.
    pub fn track(&mut self, message: &Message) -> Option<MessageId> {
        if !message.is_trackable() {
            return None;
        }

        let message_id = message.id();
        let _ = self.entries.insert(
            message_id.clone(),
            InFlightEntry {
                message_id: message_id.clone(),
                sent_at: Instant::now(),
                message: message.clone(),
            },
        );

        Some(message_id)
    }

    /// Retires the entry an ACK names. Unknown ids are ignored.
    pub fn ack(&mut self, message_id: &MessageId) -> Option<InFlightEntry> {
        let entry = self.entries.remove(message_id);

        if entry.is_none() {
            warn!(message_id = %message_id, "ack for unknown message");
        }

        entry
    }

    /// Drops the entry for a message whose send failed synchronously.
    pub fn remove(&mut self, message_id: &MessageId) {
        let _ = self.entries.remove(message_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
