//! Live order status broadcasting.
//!
//! The reconciler and fulfillment worker publish status changes here; SSE
//! subscribers on `/api/orders/{external_reference}/events` receive them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::models::OrderStatus;

/// Buffered updates per channel. A lagging SSE client skips ahead rather
/// than blocking publishers.
const CHANNEL_CAPACITY: usize = 32;

/// Broadcast registry for live order status updates, keyed by
/// `<external_reference>:<lowercased payer email>`.
///
/// Senders are created lazily on first subscribe and pruned when a publish
/// finds no remaining receivers, so idle orders cost nothing.
#[derive(Clone, Default)]
pub struct StatusNotifier {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<OrderStatus>>>>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers must present both the reference and the payer email, so
    /// a leaked reference alone cannot be used to watch someone's order.
    pub fn channel_key(external_reference: &str, email: &str) -> String {
        format!("{}:{}", external_reference, email.trim().to_lowercase())
    }

    pub async fn subscribe(&self, key: &str) -> broadcast::Receiver<OrderStatus> {
        {
            let channels = self.channels.read().await;
            if let Some(tx) = channels.get(key) {
                return tx.subscribe();
            }
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a status change to any subscribers watching this order.
    ///
    /// A channel whose receivers have all disconnected is removed here;
    /// publishing to an order nobody watches is a no-op.
    pub async fn publish(&self, external_reference: &str, email: &str, status: OrderStatus) {
        let key = Self::channel_key(external_reference, email);
        let mut channels = self.channels.write().await;
        if let Some(tx) = channels.get(&key) {
            if tx.send(status).is_err() {
                channels.remove(&key);
            }
        }
    }

    /// Number of live channels, for tests and diagnostics.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_lowercases_email() {
        assert_eq!(
            StatusNotifier::channel_key("BRV-1", " Buyer@Example.COM "),
            "BRV-1:buyer@example.com"
        );
    }

    #[tokio::test]
    async fn delivers_updates_to_subscribers() {
        let notifier = StatusNotifier::new();
        let key = StatusNotifier::channel_key("BRV-1", "buyer@example.com");
        let mut rx = notifier.subscribe(&key).await;

        notifier
            .publish("BRV-1", "buyer@example.com", OrderStatus::ReadyForMontink)
            .await;

        assert_eq!(rx.try_recv(), Ok(OrderStatus::ReadyForMontink));
    }

    #[tokio::test]
    async fn email_case_does_not_split_channels() {
        let notifier = StatusNotifier::new();
        let key = StatusNotifier::channel_key("BRV-1", "buyer@example.com");
        let mut rx = notifier.subscribe(&key).await;

        notifier
            .publish("BRV-1", "BUYER@EXAMPLE.COM", OrderStatus::Canceled)
            .await;

        assert_eq!(rx.try_recv(), Ok(OrderStatus::Canceled));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let notifier = StatusNotifier::new();
        notifier
            .publish("BRV-404", "ghost@example.com", OrderStatus::Pending)
            .await;
        assert_eq!(notifier.channel_count().await, 0);
    }

    #[tokio::test]
    async fn prunes_channels_once_receivers_disconnect() {
        let notifier = StatusNotifier::new();
        let key = StatusNotifier::channel_key("BRV-1", "buyer@example.com");
        let rx = notifier.subscribe(&key).await;
        assert_eq!(notifier.channel_count().await, 1);

        drop(rx);
        notifier
            .publish("BRV-1", "buyer@example.com", OrderStatus::Refunded)
            .await;
        assert_eq!(notifier.channel_count().await, 0);
    }
}
