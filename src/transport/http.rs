//! Blocking HTTP transport on reqwest.

use super::{Transport, TransportResult};
use crate::client::ClientConfig;
use crate::entities::{DevicePatch, EntityPatch};
use crate::error::{ClientError, Result, TransportError};
use crate::history::{PageRequest, PageResponse};
use crate::subscriptions::{SubscriptionId, SubscriptionPayload};
use crate::types::{ContextEntity, Device, FiwareHeader};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Header carrying the total record count of a paginated answer.
const TOTAL_COUNT_HEADER: &str = "fiware-total-count";

/// Talks to the broker, IoT agent and history service over HTTP.
pub struct HttpTransport {
    client: Client,
    cb_url: Url,
    iota_url: Url,
    ql_url: Url,
}

impl HttpTransport {
    /// Build a transport for the endpoints in `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let parse = |name: &str, raw: &str| {
            Url::parse(raw).map_err(|e| ClientError::Config(format!("{} {:?}: {}", name, raw, e)))
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("ngsi-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            cb_url: parse("cb_url", &config.cb_url)?,
            iota_url: parse("iota_url", &config.iota_url)?,
            ql_url: parse("ql_url", &config.ql_url)?,
        })
    }

    fn send(&self, header: &FiwareHeader, request: RequestBuilder) -> TransportResult<Response> {
        let mut request = request.header("fiware-servicepath", &header.service_path);
        if !header.service.is_empty() {
            request = request.header("fiware-service", &header.service);
        }

        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> TransportResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Http(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// The broker answers a create with `Location: /v2/subscriptions/<id>`.
fn subscription_id_from(response: &Response) -> TransportResult<String> {
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| TransportError::InvalidResponse("create answer without Location".to_string()))?;

    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransportError::InvalidResponse(format!("bad Location {:?}", location)))
}

/// Sections of the agent representation that an update may replace.
fn agent_update_body(device: &Device, changed: &DevicePatch) -> Value {
    let full = device.to_agent_payload();
    let mut body = serde_json::Map::new();
    let mut copy = |key: &str| {
        if let Some(v) = full.get(key) {
            body.insert(key.to_string(), v.clone());
        }
    };
    if !changed.attributes.is_empty() {
        copy("attributes");
    }
    if !changed.static_attributes.is_empty() {
        copy("static_attributes");
    }
    if changed.transport.is_some() {
        copy("transport");
    }
    if changed.protocol.is_some() {
        copy("protocol");
    }
    Value::Object(body)
}

impl Transport for HttpTransport {
    fn create_subscription(
        &self,
        header: &FiwareHeader,
        payload: &SubscriptionPayload,
    ) -> TransportResult<String> {
        let url = endpoint(&self.cb_url, &["v2", "subscriptions"])?;
        debug!(url = %url, "POST subscription");
        let response = self.send(header, self.client.post(url).json(payload))?;
        subscription_id_from(&response)
    }

    fn update_subscription(
        &self,
        header: &FiwareHeader,
        id: &SubscriptionId,
        payload: &SubscriptionPayload,
    ) -> TransportResult<()> {
        let url = endpoint(&self.cb_url, &["v2", "subscriptions", id.as_str()])?;
        debug!(url = %url, "PATCH subscription");
        self.send(header, self.client.patch(url).json(payload))?;
        Ok(())
    }

    fn delete_subscription(&self, header: &FiwareHeader, id: &SubscriptionId) -> TransportResult<()> {
        let url = endpoint(&self.cb_url, &["v2", "subscriptions", id.as_str()])?;
        debug!(url = %url, "DELETE subscription");
        self.send(header, self.client.delete(url))?;
        Ok(())
    }

    fn fetch_history_page(
        &self,
        header: &FiwareHeader,
        request: &PageRequest,
    ) -> TransportResult<PageResponse> {
        let url = endpoint(&self.ql_url, &["v2", "entities", &request.query.entity_id])?;
        debug!(url = %url, offset = request.offset, limit = request.limit, "GET history page");

        let response = match self.send(header, self.client.get(url).query(&request.to_params())) {
            Ok(response) => response,
            Err(TransportError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Ok(PageResponse::default());
            }
            Err(e) => return Err(e),
        };

        let total_count = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok());
        let body: Value = response.json()?;
        PageResponse::from_columns(&body, total_count)
    }

    fn post_entity(&self, header: &FiwareHeader, entity: &ContextEntity) -> TransportResult<()> {
        let url = endpoint(&self.cb_url, &["v2", "entities"])?;
        debug!(url = %url, entity = %entity, "POST entity");
        self.send(header, self.client.post(url).json(entity))?;
        Ok(())
    }

    fn get_entity(
        &self,
        header: &FiwareHeader,
        id: &str,
        entity_type: &str,
    ) -> TransportResult<ContextEntity> {
        let url = endpoint(&self.cb_url, &["v2", "entities", id])?;
        debug!(url = %url, "GET entity");
        let response = self.send(header, self.client.get(url).query(&[("type", entity_type)]))?;
        Ok(response.json()?)
    }

    fn patch_entity(
        &self,
        header: &FiwareHeader,
        id: &str,
        entity_type: &str,
        patch: &EntityPatch,
    ) -> TransportResult<()> {
        // POST on /attrs appends new attributes and replaces existing ones
        let url = endpoint(&self.cb_url, &["v2", "entities", id, "attrs"])?;
        debug!(url = %url, attrs = patch.len(), "POST entity attrs");
        self.send(
            header,
            self.client.post(url).query(&[("type", entity_type)]).json(patch),
        )?;
        Ok(())
    }

    fn delete_entity(&self, header: &FiwareHeader, id: &str, entity_type: &str) -> TransportResult<()> {
        let url = endpoint(&self.cb_url, &["v2", "entities", id])?;
        debug!(url = %url, "DELETE entity");
        self.send(header, self.client.delete(url).query(&[("type", entity_type)]))?;
        Ok(())
    }

    fn post_device(&self, header: &FiwareHeader, device: &Device) -> TransportResult<()> {
        let url = endpoint(&self.iota_url, &["iot", "devices"])?;
        debug!(url = %url, device_id = %device.device_id, "POST device");
        let body = serde_json::json!({ "devices": [device.to_agent_payload()] });
        self.send(header, self.client.post(url).json(&body))?;
        Ok(())
    }

    fn update_device(
        &self,
        header: &FiwareHeader,
        device: &Device,
        changed: &DevicePatch,
    ) -> TransportResult<()> {
        let url = endpoint(&self.iota_url, &["iot", "devices", &device.device_id])?;
        debug!(url = %url, "PUT device");
        let body = agent_update_body(device, changed);
        self.send(header, self.client.put(url).json(&body))?;
        Ok(())
    }

    fn delete_device(&self, header: &FiwareHeader, device_id: &str) -> TransportResult<()> {
        let url = endpoint(&self.iota_url, &["iot", "devices", device_id])?;
        debug!(url = %url, "DELETE device");
        self.send(header, self.client.delete(url))?;
        Ok(())
    }
}
