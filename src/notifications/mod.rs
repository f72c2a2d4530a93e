//! Inbound notifications: decoding, correlation and fan-out.
//!
//! The broker delivers a notification as an HTTP callback body or an MQTT
//! message. [`NotificationReceiver::decode`] parses either into a
//! [`Notification`] and checks that it belongs to a subscription tracked by
//! the local [`SubscriptionManager`](crate::subscriptions::SubscriptionManager).
//! Applying the deltas to cached entities is left to the caller.
//!
//! # Example
//!
//! ```ignore
//! let receiver = NotificationReceiver::new(manager.clone());
//! let router = NotificationRouter::new();
//! let handle = router.listen(&subscription_id, 64);
//!
//! // in the HTTP callback handler
//! let notification = receiver.decode(&body, &TransportKind::Http)?;
//! router.dispatch(notification);
//!
//! // elsewhere
//! let n = handle.recv()?;
//! let room = n.apply_to(&cached_room)?;
//! ```

mod receiver;
mod router;
mod types;

pub use receiver::NotificationReceiver;
pub use router::{ListenerId, NotificationHandle, NotificationRouter};
pub use types::{EntityDelta, Notification, TransportKind};
