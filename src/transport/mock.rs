//! In-memory transport for tests and offline use.
//!
//! The mock keeps entities, devices and subscriptions in maps, serves history
//! pages from a fixed dataset, records every call, and can be told to fail
//! the next calls.

use super::{Transport, TransportResult};
use crate::entities::{apply_device_patch, apply_patch, DevicePatch, EntityPatch};
use crate::error::TransportError;
use crate::history::{HistoryRecord, PageRequest, PageResponse};
use crate::subscriptions::{SubscriptionId, SubscriptionPayload};
use crate::types::{ContextEntity, Device, FiwareHeader};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// A call received by the mock.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateSubscription(SubscriptionPayload),
    UpdateSubscription(SubscriptionId, SubscriptionPayload),
    DeleteSubscription(SubscriptionId),
    FetchHistory { offset: usize, limit: usize },
    PostEntity(String),
    GetEntity(String),
    PatchEntity(String, EntityPatch),
    DeleteEntity(String),
    PostDevice(String),
    UpdateDevice(String, DevicePatch),
    DeleteDevice(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    headers: Vec<FiwareHeader>,
    /// Failures returned by the next calls, in order.
    failures: VecDeque<TransportError>,
    next_subscription: u64,
    subscriptions: BTreeMap<SubscriptionId, SubscriptionPayload>,
    entities: BTreeMap<(String, String), ContextEntity>,
    devices: BTreeMap<String, Device>,
    history: Vec<HistoryRecord>,
    report_total: bool,
    /// Most records served per page, whatever the requested limit.
    max_page: Option<usize>,
}

/// Scripted in-memory [`Transport`].
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

fn not_found(what: &str) -> TransportError {
    TransportError::Rejected {
        status: 404,
        body: format!(r#"{{"error":"NotFound","description":"{} not found"}}"#, what),
    }
}

fn unprocessable(what: &str) -> TransportError {
    TransportError::Rejected {
        status: 422,
        body: format!(r#"{{"error":"Unprocessable","description":"{} already exists"}}"#, what),
    }
}

/// The broker answers 400 unless exactly one notification endpoint is set.
fn check_endpoints(payload: &SubscriptionPayload) -> TransportResult<()> {
    payload
        .notification
        .target()
        .map(|_| ())
        .map_err(|e| TransportError::Rejected {
            status: 400,
            body: format!(r#"{{"error":"BadRequest","description":"{}"}}"#, e),
        })
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `records` as the history of every entity. When `report_total`
    /// is set, pages carry the dataset size as total-count hint.
    pub fn with_history(records: Vec<HistoryRecord>, report_total: bool) -> Self {
        let mock = Self::new();
        {
            let mut state = mock.state.lock();
            state.history = records;
            state.report_total = report_total;
        }
        mock
    }

    /// Serve at most `cap` records per history page, like a service that
    /// caps its page size below the requested limit.
    pub fn with_max_page(self, cap: usize) -> Self {
        self.state.lock().max_page = Some(cap);
        self
    }

    /// Make the next call fail with `error`. Queued failures are consumed in
    /// order, one per call.
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().failures.push_back(error);
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of history page requests received.
    pub fn history_requests(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::FetchHistory { .. }))
            .count()
    }

    /// Tenancy header of the most recent call.
    pub fn last_header(&self) -> Option<FiwareHeader> {
        self.state.lock().headers.last().cloned()
    }

    /// Subscription body as currently stored.
    pub fn subscription(&self, id: &SubscriptionId) -> Option<SubscriptionPayload> {
        self.state.lock().subscriptions.get(id).cloned()
    }

    pub fn stored_entity(&self, id: &str, entity_type: &str) -> Option<ContextEntity> {
        self.state
            .lock()
            .entities
            .get(&(id.to_string(), entity_type.to_string()))
            .cloned()
    }

    pub fn stored_device(&self, device_id: &str) -> Option<Device> {
        self.state.lock().devices.get(device_id).cloned()
    }

    /// Record the call and pop a scripted failure, if any.
    fn begin(&self, header: &FiwareHeader, call: Call) -> TransportResult<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.headers.push(header.clone());
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

impl Transport for MockTransport {
    fn create_subscription(
        &self,
        header: &FiwareHeader,
        payload: &SubscriptionPayload,
    ) -> TransportResult<String> {
        let mut state = self.begin(header, Call::CreateSubscription(payload.clone()))?;
        check_endpoints(payload)?;
        state.next_subscription += 1;
        let raw = format!("{:024x}", state.next_subscription);
        let id = SubscriptionId::new(raw.clone())
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        state.subscriptions.insert(id, payload.clone());
        Ok(raw)
    }

    fn update_subscription(
        &self,
        header: &FiwareHeader,
        id: &SubscriptionId,
        payload: &SubscriptionPayload,
    ) -> TransportResult<()> {
        let mut state = self.begin(header, Call::UpdateSubscription(id.clone(), payload.clone()))?;
        check_endpoints(payload)?;
        match state.subscriptions.get_mut(id) {
            Some(stored) => {
                *stored = payload.clone();
                Ok(())
            }
            None => Err(not_found("subscription")),
        }
    }

    fn delete_subscription(&self, header: &FiwareHeader, id: &SubscriptionId) -> TransportResult<()> {
        let mut state = self.begin(header, Call::DeleteSubscription(id.clone()))?;
        state
            .subscriptions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("subscription"))
    }

    fn fetch_history_page(
        &self,
        header: &FiwareHeader,
        request: &PageRequest,
    ) -> TransportResult<PageResponse> {
        let state = self.begin(
            header,
            Call::FetchHistory {
                offset: request.offset,
                limit: request.limit,
            },
        )?;
        let records = state
            .history
            .iter()
            .skip(request.offset)
            .take(state.max_page.map_or(request.limit, |cap| cap.min(request.limit)))
            .cloned()
            .collect();
        Ok(PageResponse {
            records,
            total_count: state.report_total.then_some(state.history.len()),
        })
    }

    fn post_entity(&self, header: &FiwareHeader, entity: &ContextEntity) -> TransportResult<()> {
        let mut state = self.begin(header, Call::PostEntity(entity.id.clone()))?;
        let key = (entity.id.clone(), entity.entity_type.clone());
        if state.entities.contains_key(&key) {
            return Err(unprocessable("entity"));
        }
        state.entities.insert(key, entity.clone());
        Ok(())
    }

    fn get_entity(
        &self,
        header: &FiwareHeader,
        id: &str,
        entity_type: &str,
    ) -> TransportResult<ContextEntity> {
        let state = self.begin(header, Call::GetEntity(id.to_string()))?;
        state
            .entities
            .get(&(id.to_string(), entity_type.to_string()))
            .cloned()
            .ok_or_else(|| not_found("entity"))
    }

    fn patch_entity(
        &self,
        header: &FiwareHeader,
        id: &str,
        entity_type: &str,
        patch: &EntityPatch,
    ) -> TransportResult<()> {
        let mut state = self.begin(header, Call::PatchEntity(id.to_string(), patch.clone()))?;
        let key = (id.to_string(), entity_type.to_string());
        let current = state.entities.get(&key).ok_or_else(|| not_found("entity"))?;
        let patched = apply_patch(current, patch).map_err(|e| TransportError::Rejected {
            status: 400,
            body: e.to_string(),
        })?;
        state.entities.insert(key, patched);
        Ok(())
    }

    fn delete_entity(&self, header: &FiwareHeader, id: &str, entity_type: &str) -> TransportResult<()> {
        let mut state = self.begin(header, Call::DeleteEntity(id.to_string()))?;
        state
            .entities
            .remove(&(id.to_string(), entity_type.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found("entity"))
    }

    fn post_device(&self, header: &FiwareHeader, device: &Device) -> TransportResult<()> {
        let mut state = self.begin(header, Call::PostDevice(device.device_id.clone()))?;
        if state.devices.contains_key(&device.device_id) {
            return Err(TransportError::Rejected {
                status: 409,
                body: r#"{"name":"DUPLICATE_DEVICE_ID"}"#.to_string(),
            });
        }
        state.devices.insert(device.device_id.clone(), device.clone());
        Ok(())
    }

    fn update_device(
        &self,
        header: &FiwareHeader,
        device: &Device,
        changed: &DevicePatch,
    ) -> TransportResult<()> {
        let mut state = self.begin(
            header,
            Call::UpdateDevice(device.device_id.clone(), changed.clone()),
        )?;
        let current = state
            .devices
            .get(&device.device_id)
            .ok_or_else(|| not_found("device"))?;
        let patched = apply_device_patch(current, changed).map_err(|e| TransportError::Rejected {
            status: 400,
            body: e.to_string(),
        })?;
        state.devices.insert(device.device_id.clone(), patched);
        Ok(())
    }

    fn delete_device(&self, header: &FiwareHeader, device_id: &str) -> TransportResult<()> {
        let mut state = self.begin(header, Call::DeleteDevice(device_id.to_string()))?;
        state
            .devices
            .remove(device_id)
            .map(|_| ())
            .ok_or_else(|| not_found("device"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(n: usize) -> Vec<HistoryRecord> {
        (0..n)
            .map(|i| HistoryRecord::new(format!("t{}", i)).with_value("v", json!(i)))
            .collect()
    }

    #[test]
    fn test_history_windows() {
        let mock = MockTransport::with_history(records(5), true);
        let request = PageRequest {
            query: crate::history::HistoryQuery::entity("Room1"),
            offset: 3,
            limit: 10,
        };
        let page = mock.fetch_history_page(&FiwareHeader::default(), &request).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].index, "t3");
        assert_eq!(page.total_count, Some(5));
    }

    #[test]
    fn test_page_cap_below_limit() {
        let mock = MockTransport::with_history(records(25), true).with_max_page(4);
        let request = PageRequest {
            query: crate::history::HistoryQuery::entity("Room1"),
            offset: 20,
            limit: 10,
        };
        let page = mock.fetch_history_page(&FiwareHeader::default(), &request).unwrap();
        assert_eq!(page.records.len(), 4);
        assert_eq!(page.records[0].index, "t20");
        assert_eq!(page.total_count, Some(25));
    }

    #[test]
    fn test_rejects_conflicting_endpoints() {
        use crate::subscriptions::{HttpEndpoint, NotificationTarget, Subject, SubscriptionRequest};

        let mock = MockTransport::new();
        let mut payload = SubscriptionRequest::new(
            Subject::of_type("Room"),
            NotificationTarget::mqtt("mqtt://broker:1883", "rooms"),
        )
        .to_payload()
        .unwrap();
        payload.notification.http = Some(HttpEndpoint {
            url: "http://app/notify".to_string(),
        });

        let err = mock
            .create_subscription(&FiwareHeader::default(), &payload)
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 400, .. }));
    }

    #[test]
    fn test_scripted_failure_consumed_once() {
        let mock = MockTransport::new();
        mock.fail_next(TransportError::Http("down".to_string()));
        let header = FiwareHeader::default();

        assert!(mock.delete_device(&header, "d1").is_err());
        // second call reaches the store
        let err = mock.delete_device(&header, "d1").unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 404, .. }));
        assert_eq!(mock.calls().len(), 2);
    }
}
