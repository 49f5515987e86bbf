//! Per-document broadcast fan-out.

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use veil_primitives::DocumentId;

/// Routes stored and ephemeral frames to everyone subscribed to a document.
///
/// Channels are created lazily on first use and never torn down; an idle
/// channel with no subscribers costs one map entry.
#[derive(Debug)]
pub struct Hub {
    capacity: usize,
    channels: DashMap<DocumentId, broadcast::Sender<Bytes>>,
}

impl Hub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, document: &DocumentId) -> broadcast::Receiver<Bytes> {
        self.channel(document).subscribe()
    }

    /// Publishes one frame; returns how many subscribers it reached.
    pub fn publish(&self, document: &DocumentId, frame: Bytes) -> usize {
        self.channel(document).send(frame).unwrap_or(0)
    }

    fn channel(&self, document: &DocumentId) -> broadcast::Sender<Bytes> {
        let entry = self
            .channels
            .entry(document.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        entry.value().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_per_document() {
        let hub = Hub::new(8);

        let mut a = hub.subscribe(&"doc-a".into());
        let mut b = hub.subscribe(&"doc-a".into());
        let mut other = hub.subscribe(&"doc-b".into());

        let reached = hub.publish(&"doc-a".into(), Bytes::from_static(b"frame"));
        assert_eq!(reached, 2);

        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let hub = Hub::new(8);

        assert_eq!(hub.publish(&"empty".into(), Bytes::new()), 0);
    }
}
