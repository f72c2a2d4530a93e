//! # NGSI Client
//!
//! Typed client for FIWARE context brokers, IoT agents and the time-series
//! history service.
//!
//! ## Core Concepts
//!
//! - **Queries**: Filter expressions compiled to and parsed from the broker's
//!   simple query language, validated before anything is sent
//! - **Subscriptions**: Change triggers registered with the broker and tracked
//!   through their lifecycle
//! - **Notifications**: Inbound callback or MQTT payloads decoded into entity
//!   deltas and correlated with their subscription
//! - **History**: Multi-page time-series results read through one cursor
//!
//! Every networked operation takes a [`ClientContext`], which carries the
//! configuration, tenancy header and transport.
//!
//! ## Example
//!
//! ```ignore
//! use ngsi_client::{ClientConfig, ClientContext, SubscriptionManager};
//! use ngsi_client::query::Term;
//! use ngsi_client::subscriptions::{NotificationTarget, Subject, SubscriptionRequest};
//!
//! let ctx = ClientContext::http(ClientConfig::from_env()?)?;
//! let manager = SubscriptionManager::new();
//!
//! let subject = Subject::of_type("Room")
//!     .with_expression(Term::gt("temperature", 40).into());
//! let sub = manager.register(
//!     &ctx,
//!     SubscriptionRequest::new(subject, NotificationTarget::http("http://app:8080/notify"))
//!         .with_throttling(5),
//! )?;
//! ```

pub mod client;
pub mod entities;
pub mod error;
pub mod history;
pub mod notifications;
pub mod query;
pub mod subscriptions;
pub mod transport;
pub mod types;

// Re-exports
pub use client::{ClientConfig, ClientContext};
pub use entities::{apply_patch, diff, EntityPatch};
pub use error::{ClientError, Result, TransportError};
pub use history::{HistoryQuery, HistoryRecord, Page, PageCursor, PaginatedReader};
pub use notifications::{
    EntityDelta, Notification, NotificationReceiver, NotificationRouter, TransportKind,
};
pub use query::{compile, parse, QueryExpression, Term};
pub use subscriptions::{
    Subscription, SubscriptionId, SubscriptionManager, SubscriptionRequest, SubscriptionStatus,
};
pub use transport::{HttpTransport, Transport};
#[cfg(any(test, feature = "mock"))]
pub use transport::MockTransport;
pub use types::*;
