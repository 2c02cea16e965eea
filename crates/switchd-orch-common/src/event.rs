//! Typed event channels between orchestrators.
//!
//! Cross-orchestrator signalling goes through one channel per subject type
//! instead of a subscriber list with a type tag. Subscribers take a receiver
//! for the subjects they care about; publishers never learn who listens.

use switchd_types::{IpAddress, OperStatus};
use tokio::sync::broadcast;

/// A port's operational state changed.
#[derive(Debug, Clone)]
pub struct PortOperUpdate {
    pub alias: String,
    pub status: OperStatus,
}

/// A neighbor resolved or unresolved.
#[derive(Debug, Clone)]
pub struct NeighborUpdate {
    pub ip: IpAddress,
    pub alias: String,
    pub resolved: bool,
}

/// Broadcast channel for one subject type.
pub struct EventChannel<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event; silently drops it when nobody listens.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let channel: EventChannel<PortOperUpdate> = EventChannel::new(8);
        let mut rx = channel.subscribe();

        channel.publish(PortOperUpdate {
            alias: "Ethernet4".to_string(),
            status: OperStatus::Down,
        });

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.alias, "Ethernet4");
        assert!(!ev.status.is_up());
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let channel: EventChannel<NeighborUpdate> = EventChannel::default();
        channel.publish(NeighborUpdate {
            ip: "10.0.0.1".parse().unwrap(),
            alias: "Ethernet0".to_string(),
            resolved: true,
        });
        assert_eq!(channel.receiver_count(), 0);
    }
}
