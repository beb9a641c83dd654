// libs/consultation-cell/src/services/notifications.rs
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::models::{Notification, NotificationLevel};

pub type NotificationReceiver = broadcast::Receiver<Notification>;

/// Fire-and-forget delivery of user-facing messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Fans notifications out to every subscribed UI over a broadcast channel.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    pub fn subscribe(&self) -> NotificationReceiver {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Success => info!("Notify: {}", notification.message),
            NotificationLevel::Warning => warn!("Notify: {}", notification.message),
            NotificationLevel::Error => error!("Notify: {}", notification.message),
        }

        if self.sender.send(notification).is_err() {
            debug!("No notification subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let notifier = BroadcastNotifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.notify(Notification::warning("Slow network").with_key("network-quality"));

        let received = first.recv().await.unwrap();
        assert_eq!(received.level, NotificationLevel::Warning);
        assert_eq!(received.dedup_key.as_deref(), Some("network-quality"));
        assert_eq!(second.recv().await.unwrap(), received);
    }

    #[test]
    fn test_notify_without_subscribers_does_not_fail() {
        let notifier = BroadcastNotifier::new();
        notifier.notify(Notification::success("Saved"));
    }
}
