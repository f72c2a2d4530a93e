//! Network seam between the client core and the remote services.
//!
//! Every round-trip the core performs goes through [`Transport`]. The
//! blocking [`HttpTransport`] talks to a real broker, IoT agent and
//! time-series service. With the `mock` feature (on by default),
//! `MockTransport` answers from memory and records the calls it received.
//!
//! Implementations own timeouts and retries. The core never retries.

mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use http::HttpTransport;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;

use crate::entities::{DevicePatch, EntityPatch};
use crate::error::TransportError;
use crate::history::{PageRequest, PageResponse};
use crate::subscriptions::{SubscriptionId, SubscriptionPayload};
use crate::types::{ContextEntity, Device, FiwareHeader};

/// Result of a single round-trip.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Round-trips against the context broker, IoT agent and history service.
///
/// Non-success answers are reported as [`TransportError::Rejected`] with the
/// body verbatim; failures without an answer as [`TransportError::Http`].
pub trait Transport: Send + Sync {
    // --- Subscriptions ---

    /// Create a subscription and return the id assigned by the broker.
    fn create_subscription(
        &self,
        header: &FiwareHeader,
        payload: &SubscriptionPayload,
    ) -> TransportResult<String>;

    fn update_subscription(
        &self,
        header: &FiwareHeader,
        id: &SubscriptionId,
        payload: &SubscriptionPayload,
    ) -> TransportResult<()>;

    fn delete_subscription(&self, header: &FiwareHeader, id: &SubscriptionId)
        -> TransportResult<()>;

    // --- History ---

    /// Fetch one page of history. A missing entity yields an empty page.
    fn fetch_history_page(
        &self,
        header: &FiwareHeader,
        request: &PageRequest,
    ) -> TransportResult<PageResponse>;

    // --- Entities ---

    fn post_entity(&self, header: &FiwareHeader, entity: &ContextEntity) -> TransportResult<()>;

    fn get_entity(
        &self,
        header: &FiwareHeader,
        id: &str,
        entity_type: &str,
    ) -> TransportResult<ContextEntity>;

    /// Add or replace the attributes named in `patch`.
    fn patch_entity(
        &self,
        header: &FiwareHeader,
        id: &str,
        entity_type: &str,
        patch: &EntityPatch,
    ) -> TransportResult<()>;

    fn delete_entity(&self, header: &FiwareHeader, id: &str, entity_type: &str)
        -> TransportResult<()>;

    // --- Devices ---

    fn post_device(&self, header: &FiwareHeader, device: &Device) -> TransportResult<()>;

    /// Push the sections of `device` that `changed` touches.
    fn update_device(
        &self,
        header: &FiwareHeader,
        device: &Device,
        changed: &DevicePatch,
    ) -> TransportResult<()>;

    fn delete_device(&self, header: &FiwareHeader, device_id: &str) -> TransportResult<()>;
}
