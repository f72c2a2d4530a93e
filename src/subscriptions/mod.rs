//! Subscriptions registered with the context broker.
//!
//! A subscription moves through a small state machine:
//!
//! ```text
//! pending --ack(id)--> active --expiry--> expired
//!    |                   |
//!    +--reject--> failed +--delete--> deleted
//! ```
//!
//! A subscription that never reached the broker (rejected, or abandoned
//! while pending) is released with `forget`.
//!
//! The broker assigns the identifier; a subscription has none until the
//! create request is acknowledged. Local handles ([`LocalId`]) exist from
//! the moment of creation so pending subscriptions can still be referred to.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//!
//! let request = SubscriptionRequest::new(
//!     Subject::of_type("Room").with_expression(Term::gt("temperature", 40).into()),
//!     NotificationTarget::http("http://receiver:8080/notify"),
//! )
//! .with_throttling(5);
//!
//! let sub = manager.register(&ctx, request)?;
//! assert_eq!(sub.status, SubscriptionStatus::Active);
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ActivationStatus, Condition, ConditionPayload, ExpressionPayload, HttpCustomEndpoint,
    HttpEndpoint, HttpMethod, LocalId, MqttCustomEndpoint, MqttEndpoint, NotificationPayload,
    NotificationTarget, Subject, SubjectPayload, Subscription, SubscriptionId,
    SubscriptionPayload, SubscriptionRequest, SubscriptionStatus, SubscriptionUpdate,
};
