//! Event fan-out to subscribers.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use veil_codec::Message;

use crate::state::ConnectionState;

/// What a connection reports while it runs.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    /// The state machine moved.
    StateChanged(ConnectionState),

    /// The in-flight set crossed between empty and non-empty.
    MessagesInFlight(bool),

    /// An inbound message, in the order the transport delivered it.
    Message(Message),
}

/// A scoped subscription to connection events.
///
/// Dropping it unsubscribes; destroying the connection releases every
/// subscription (`recv` returns `None`).
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<ConnectionEvent>,
    released: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<ConnectionEvent>,
        released: CancellationToken,
    ) -> Self {
        Self { receiver, released }
    }

    /// The next event, or `None` once the connection is destroyed.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        loop {
            let result = tokio::select! {
                () = self.released.cancelled() => return None,
                result = self.receiver.recv() => result,
            };

            match result {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind connection events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
