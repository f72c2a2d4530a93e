//! Client configuration and the session context passed to every networked
//! operation.

use crate::entities::{apply_device_patch, diff, diff_devices, EntityPatch};
use crate::error::{ClientError, Result};
use crate::transport::{HttpTransport, Transport};
use crate::types::{ContextEntity, Device, FiwareHeader};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Endpoints, tenancy and timeouts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Context broker base URL.
    pub cb_url: String,

    /// IoT agent north-bound base URL.
    pub iota_url: String,

    /// Time-series (history) service base URL.
    pub ql_url: String,

    /// `Fiware-Service`; empty for the default tenant.
    pub service: String,

    /// `Fiware-ServicePath`.
    pub service_path: String,

    /// Per-request timeout applied by the HTTP transport.
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cb_url: "http://127.0.0.1:1026".to_string(),
            iota_url: "http://127.0.0.1:4041".to_string(),
            ql_url: "http://127.0.0.1:8668".to_string(),
            service: String::new(),
            service_path: "/".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `CB_URL`, `IOTA_URL`, `QL_URL`,
    /// `FIWARE_SERVICE`, `FIWARE_SERVICEPATH` and `REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("CB_URL") {
            config.cb_url = v;
        }
        if let Some(v) = lookup("IOTA_URL") {
            config.iota_url = v;
        }
        if let Some(v) = lookup("QL_URL") {
            config.ql_url = v;
        }
        if let Some(v) = lookup("FIWARE_SERVICE") {
            config.service = v;
        }
        if let Some(v) = lookup("FIWARE_SERVICEPATH") {
            config.service_path = v;
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = v.trim().parse().map_err(|_| {
                ClientError::Config(format!("REQUEST_TIMEOUT_SECS must be an integer, got {:?}", v))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ClientError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check URLs and the tenancy header.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("cb_url", &self.cb_url),
            ("iota_url", &self.iota_url),
            ("ql_url", &self.ql_url),
        ] {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| ClientError::Config(format!("{} {:?}: {}", name, url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
                return Err(ClientError::Config(format!(
                    "{} must be an absolute http(s) URL, got {:?}",
                    name, url
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        self.header()
            .validate()
            .map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Tenancy header described by this config.
    pub fn header(&self) -> FiwareHeader {
        FiwareHeader {
            service: self.service.clone(),
            service_path: self.service_path.clone(),
        }
    }
}

/// Session state for networked operations: configuration, tenancy header
/// and transport. Passed explicitly; there is no global session.
#[derive(Clone)]
pub struct ClientContext {
    config: ClientConfig,
    header: FiwareHeader,
    transport: Arc<dyn Transport>,
}

impl ClientContext {
    /// Context over any transport.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let header = config.header();
        Ok(Self {
            config,
            header,
            transport,
        })
    }

    /// Context talking HTTP to the configured endpoints.
    pub fn http(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn header(&self) -> &FiwareHeader {
        &self.header
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // --- Entities ---

    /// Create an entity on the broker.
    pub fn post_entity(&self, entity: &ContextEntity) -> Result<()> {
        self.transport
            .post_entity(&self.header, entity)
            .map_err(ClientError::from_transport)?;
        info!(entity = %entity, "entity created");
        Ok(())
    }

    pub fn get_entity(&self, id: &str, entity_type: &str) -> Result<ContextEntity> {
        self.transport
            .get_entity(&self.header, id, entity_type)
            .map_err(ClientError::from_transport)
    }

    /// Send the attributes in `patch`; an empty patch sends nothing.
    pub fn patch_entity(&self, id: &str, entity_type: &str, patch: &EntityPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.transport
            .patch_entity(&self.header, id, entity_type, patch)
            .map_err(ClientError::from_transport)?;
        debug!(entity_id = id, attrs = patch.len(), "entity patched");
        Ok(())
    }

    /// Push the changes between two snapshots of the same entity and return
    /// the patch that was sent.
    pub fn update_entity(&self, old: &ContextEntity, new: &ContextEntity) -> Result<EntityPatch> {
        let patch = diff(old, new)?;
        self.patch_entity(&new.id, &new.entity_type, &patch)?;
        Ok(patch)
    }

    pub fn delete_entity(&self, id: &str, entity_type: &str) -> Result<()> {
        self.transport
            .delete_entity(&self.header, id, entity_type)
            .map_err(ClientError::from_transport)?;
        info!(entity_id = id, "entity deleted");
        Ok(())
    }

    // --- Devices ---

    /// Provision a device on the IoT agent.
    pub fn register_device(&self, device: &Device) -> Result<()> {
        self.transport
            .post_device(&self.header, device)
            .map_err(ClientError::from_transport)?;
        info!(device_id = %device.device_id, "device registered");
        Ok(())
    }

    /// Push the changes between two snapshots of the same device. Returns
    /// the device as it now stands on the agent.
    pub fn update_device(&self, old: &Device, new: &Device) -> Result<Device> {
        let patch = diff_devices(old, new)?;
        let updated = apply_device_patch(old, &patch)?;
        if patch.is_empty() {
            return Ok(updated);
        }
        self.transport
            .update_device(&self.header, &updated, &patch)
            .map_err(ClientError::from_transport)?;
        debug!(device_id = %updated.device_id, "device updated");
        Ok(updated)
    }

    pub fn delete_device(&self, device_id: &str) -> Result<()> {
        self.transport
            .delete_device(&self.header, device_id)
            .map_err(ClientError::from_transport)?;
        info!(device_id, "device deleted");
        Ok(())
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Call, MockTransport};
    use crate::types::ContextAttribute;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CB_URL", "http://orion:1026"),
            ("FIWARE_SERVICE", "smart_city"),
            ("FIWARE_SERVICEPATH", "/district1"),
            ("REQUEST_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.cb_url, "http://orion:1026");
        assert_eq!(config.ql_url, "http://127.0.0.1:8668");
        assert_eq!(config.header().service, "smart_city");
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_invalid_config() {
        let bad_timeout = ClientConfig::from_lookup(|k| {
            (k == "REQUEST_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(bad_timeout, Err(ClientError::Config(_))));

        let bad_service = ClientConfig {
            service: "Smart City".to_string(),
            ..Default::default()
        };
        assert!(bad_service.validate().is_err());

        let bad_scheme = ClientConfig {
            ql_url: "ftp://ql:8668".to_string(),
            ..Default::default()
        };
        assert!(bad_scheme.validate().is_err());
    }

    #[test]
    fn test_update_entity_sends_only_changes() {
        let mock = Arc::new(MockTransport::new());
        let ctx = ClientContext::new(ClientConfig::default(), mock.clone()).unwrap();

        let old = ContextEntity::new("Room1", "Room")
            .unwrap()
            .with_attribute("temperature", ContextAttribute::number(20))
            .with_attribute("name", ContextAttribute::text("Kitchen"));
        ctx.post_entity(&old).unwrap();

        let new = old
            .clone()
            .with_attribute("temperature", ContextAttribute::number(23));
        let sent = ctx.update_entity(&old, &new).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(ctx.get_entity("Room1", "Room").unwrap(), new);

        // unchanged snapshots issue no request
        let before = mock.calls().len();
        assert!(ctx.update_entity(&new, &new).unwrap().is_empty());
        assert_eq!(mock.calls().len(), before);
        assert!(matches!(mock.calls()[1], Call::PatchEntity(..)));
    }

    #[test]
    fn test_missing_entity_is_rejection() {
        let ctx = ClientContext::new(ClientConfig::default(), Arc::new(MockTransport::new())).unwrap();
        let err = ctx.get_entity("Nope", "Room").unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 404, .. }));
    }
}
