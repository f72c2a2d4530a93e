//! Fan-out of decoded notifications to per-subscription listeners.

use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::types::Notification;
use crate::subscriptions::SubscriptionId;

/// Identifier of one listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

struct Listener {
    id: ListenerId,
    sender: Sender<Notification>,
}

impl Listener {
    /// Returns false if the buffer is full or the handle was dropped.
    fn try_send(&self, notification: Notification) -> bool {
        match self.sender.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Delivers notifications to listeners registered per subscription.
///
/// Each listener gets a bounded buffer. A listener that falls behind (full
/// buffer) or whose handle was dropped is removed on the next dispatch.
pub struct NotificationRouter {
    listeners: RwLock<HashMap<SubscriptionId, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start listening for notifications of `subscription_id`.
    pub fn listen(&self, subscription_id: &SubscriptionId, buffer_size: usize) -> NotificationHandle {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(buffer_size.max(1));

        self.listeners
            .write()
            .entry(subscription_id.clone())
            .or_default()
            .push(Listener { id, sender });

        NotificationHandle {
            id,
            subscription_id: subscription_id.clone(),
            receiver,
        }
    }

    /// Deliver to every listener of the notification's subscription.
    /// Returns how many listeners received it.
    pub fn dispatch(&self, notification: Notification) -> usize {
        let mut listeners = self.listeners.write();
        let Some(targets) = listeners.get_mut(&notification.subscription_id) else {
            debug!(subscription_id = %notification.subscription_id, "no listeners");
            return 0;
        };

        let before = targets.len();
        targets.retain(|listener| listener.try_send(notification.clone()));
        let delivered = targets.len();
        if delivered < before {
            warn!(
                subscription_id = %notification.subscription_id,
                dropped = before - delivered,
                "dropped slow or closed listeners"
            );
        }
        if targets.is_empty() {
            listeners.remove(&notification.subscription_id);
        }
        delivered
    }

    /// Remove a single listener.
    pub fn unlisten(&self, handle: &NotificationHandle) {
        let mut listeners = self.listeners.write();
        if let Some(targets) = listeners.get_mut(&handle.subscription_id) {
            targets.retain(|l| l.id != handle.id);
            if targets.is_empty() {
                listeners.remove(&handle.subscription_id);
            }
        }
    }

    /// Remove every listener of a subscription, e.g. after deleting it.
    /// Their handles see a disconnected channel once drained.
    pub fn forget(&self, subscription_id: &SubscriptionId) {
        self.listeners.write().remove(subscription_id);
    }

    /// Number of registered listeners across all subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a listener.
pub struct NotificationHandle {
    pub id: ListenerId,
    pub subscription_id: SubscriptionId,
    receiver: Receiver<Notification>,
}

impl NotificationHandle {
    /// Receive the next notification (blocking).
    pub fn recv(&self) -> Result<Notification, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notification (non-blocking).
    pub fn try_recv(&self) -> Result<Notification, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Notification, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &SubscriptionId) -> Notification {
        Notification {
            subscription_id: id.clone(),
            deltas: Vec::new(),
        }
    }

    #[test]
    fn test_dispatch_to_matching_listeners() {
        let router = NotificationRouter::new();
        let a = SubscriptionId::new("a").unwrap();
        let b = SubscriptionId::new("b").unwrap();

        let ha = router.listen(&a, 4);
        let hb = router.listen(&b, 4);

        assert_eq!(router.dispatch(note(&a)), 1);
        assert_eq!(ha.try_recv().unwrap().subscription_id, a);
        assert!(hb.try_recv().is_err());
    }

    #[test]
    fn test_slow_listener_dropped() {
        let router = NotificationRouter::new();
        let id = SubscriptionId::new("s").unwrap();
        let slow = router.listen(&id, 1);
        let _fast = router.listen(&id, 8);

        assert_eq!(router.dispatch(note(&id)), 2);
        // slow buffer is now full
        assert_eq!(router.dispatch(note(&id)), 1);
        assert_eq!(router.listener_count(), 1);

        assert!(slow.recv_timeout(Duration::from_millis(10)).is_ok());
        assert!(matches!(slow.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn test_dropped_handle_removed() {
        let router = NotificationRouter::new();
        let id = SubscriptionId::new("s").unwrap();
        drop(router.listen(&id, 2));
        assert_eq!(router.dispatch(note(&id)), 0);
        assert_eq!(router.listener_count(), 0);
    }

    #[test]
    fn test_forget_and_unlisten() {
        let router = NotificationRouter::new();
        let id = SubscriptionId::new("s").unwrap();
        let h1 = router.listen(&id, 2);
        let _h2 = router.listen(&id, 2);

        router.unlisten(&h1);
        assert_eq!(router.listener_count(), 1);
        router.forget(&id);
        assert_eq!(router.listener_count(), 0);
    }
}
