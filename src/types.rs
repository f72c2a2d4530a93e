//! Core types shared by every component: entities, attributes, devices and
//! the FIWARE multi-tenancy header.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Characters the broker refuses in ids, types and attribute names.
const FORBIDDEN_FIELD_CHARS: &[char] = &['<', '>', '"', '\'', '=', ';', '(', ')', '?', '/', '#', '&'];

/// Maximum length of an id or type field.
const MAX_FIELD_LEN: usize = 256;

/// Maximum length of a service name or one service path segment.
const MAX_SERVICE_LEN: usize = 50;

/// Check a string against the broker's id/type field syntax.
pub fn validate_field(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_FIELD_LEN {
        return Err(ClientError::Validation(format!(
            "{} must be 1..={} characters, got {}",
            kind,
            MAX_FIELD_LEN,
            value.len()
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_graphic() || FORBIDDEN_FIELD_CHARS.contains(c))
    {
        return Err(ClientError::Validation(format!(
            "{} {:?} contains forbidden character {:?}",
            kind, value, c
        )));
    }
    Ok(())
}

// --- Tenancy ---

/// `Fiware-Service` / `Fiware-ServicePath` pair sent with every request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiwareHeader {
    /// Tenant name; empty means the default tenant.
    #[serde(default)]
    pub service: String,
    #[serde(default = "default_service_path")]
    pub service_path: String,
}

fn default_service_path() -> String {
    "/".to_string()
}

impl Default for FiwareHeader {
    fn default() -> Self {
        Self {
            service: String::new(),
            service_path: default_service_path(),
        }
    }
}

impl FiwareHeader {
    /// Create a validated header.
    pub fn new(service: impl Into<String>, service_path: impl Into<String>) -> Result<Self> {
        let header = Self {
            service: service.into(),
            service_path: service_path.into(),
        };
        header.validate()?;
        Ok(header)
    }

    /// Check the header against the broker's tenancy rules.
    pub fn validate(&self) -> Result<()> {
        if self.service.len() > MAX_SERVICE_LEN
            || !self
                .service
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ClientError::Validation(format!(
                "invalid service {:?}: lowercase alphanumerics and '_' only, at most {} chars",
                self.service, MAX_SERVICE_LEN
            )));
        }

        if self.service_path == "/" {
            return Ok(());
        }
        let Some(rest) = self.service_path.strip_prefix('/') else {
            return Err(ClientError::Validation(format!(
                "service path {:?} must start with '/'",
                self.service_path
            )));
        };
        for segment in rest.split('/') {
            if segment.is_empty()
                || segment.len() > MAX_SERVICE_LEN
                || !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(ClientError::Validation(format!(
                    "invalid service path segment {:?} in {:?}",
                    segment, self.service_path
                )));
            }
        }
        Ok(())
    }
}

// --- Entities ---

/// Metadata item attached to an attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "type")]
    pub meta_type: String,
    #[serde(default)]
    pub value: Value,
}

/// A typed attribute value in normalized form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextAttribute {
    /// Declared type tag (e.g. `Number`, `Text`).
    #[serde(rename = "type")]
    pub attr_type: String,

    #[serde(default)]
    pub value: Value,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Metadata>,
}

impl ContextAttribute {
    pub fn new(attr_type: impl Into<String>, value: Value) -> Self {
        Self {
            attr_type: attr_type.into(),
            value,
            metadata: BTreeMap::new(),
        }
    }

    pub fn number(value: impl Into<serde_json::Number>) -> Self {
        Self::new("Number", Value::Number(value.into()))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new("Text", Value::String(value.into()))
    }

    /// Attribute for a bare key-value representation, with the type tag the
    /// broker would assign.
    pub fn infer(value: Value) -> Self {
        let attr_type = match &value {
            Value::Number(_) => "Number",
            Value::String(_) => "Text",
            Value::Bool(_) => "Boolean",
            Value::Null => "None",
            Value::Array(_) | Value::Object(_) => "StructuredValue",
        };
        Self::new(attr_type, value)
    }

    /// Attach a metadata item.
    pub fn with_metadata(mut self, name: impl Into<String>, meta: Metadata) -> Self {
        self.metadata.insert(name.into(), meta);
        self
    }
}

/// A context entity snapshot. Identity is the `(id, entity_type)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntity {
    pub id: String,

    #[serde(rename = "type")]
    pub entity_type: String,

    /// Attributes by name.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, ContextAttribute>,
}

impl ContextEntity {
    /// Create an entity with no attributes, validating id and type.
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let entity_type = entity_type.into();
        validate_field("entity id", &id)?;
        validate_field("entity type", &entity_type)?;
        Ok(Self {
            id,
            entity_type,
            attributes: BTreeMap::new(),
        })
    }

    /// Add or replace an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: ContextAttribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&ContextAttribute> {
        self.attributes.get(name)
    }

    /// True if `other` names the same broker entity.
    pub fn same_identity(&self, other: &ContextEntity) -> bool {
        self.id == other.id && self.entity_type == other.entity_type
    }
}

impl fmt::Display for ContextEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.entity_type, self.id)
    }
}

/// Entity selector used in subscription subjects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_pattern: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_pattern: Option<String>,
}

impl EntityPattern {
    /// Every entity of a type.
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self {
            id_pattern: Some(".*".to_string()),
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }

    /// A single entity.
    pub fn entity(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }

    /// Check mutual exclusion of exact and pattern fields and regex syntax.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_some() && self.id_pattern.is_some() {
            return Err(ClientError::Validation(
                "entity pattern cannot set both id and idPattern".to_string(),
            ));
        }
        if self.entity_type.is_some() && self.type_pattern.is_some() {
            return Err(ClientError::Validation(
                "entity pattern cannot set both type and typePattern".to_string(),
            ));
        }
        if let Some(ref id) = self.id {
            validate_field("entity id", id)?;
        }
        if let Some(ref t) = self.entity_type {
            validate_field("entity type", t)?;
        }
        for pattern in [&self.id_pattern, &self.type_pattern].into_iter().flatten() {
            regex::Regex::new(pattern).map_err(|e| {
                ClientError::Validation(format!("invalid pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// Representation of entities inside notifications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttrsFormat {
    #[default]
    Normalized,
    KeyValues,
    Values,
}

// --- Devices ---

/// Southbound transport of an IoT agent device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceTransport {
    Mqtt,
    Http,
    Amqp,
}

/// A device provisioned on the IoT agent.
///
/// Attributes reuse [`ContextAttribute`]; active attributes carry a null
/// value until the device reports one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub entity_name: String,
    pub entity_type: String,
    pub transport: DeviceTransport,
    /// Southbound payload protocol (e.g. `IoTA-UL`, `IoTA-JSON`).
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apikey: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, ContextAttribute>,
    #[serde(default)]
    pub static_attributes: BTreeMap<String, ContextAttribute>,
}

impl Device {
    pub fn new(
        device_id: impl Into<String>,
        entity_name: impl Into<String>,
        entity_type: impl Into<String>,
        transport: DeviceTransport,
        protocol: impl Into<String>,
    ) -> Result<Self> {
        let device = Self {
            device_id: device_id.into(),
            entity_name: entity_name.into(),
            entity_type: entity_type.into(),
            transport,
            protocol: protocol.into(),
            apikey: None,
            attributes: BTreeMap::new(),
            static_attributes: BTreeMap::new(),
        };
        validate_field("device id", &device.device_id)?;
        validate_field("entity name", &device.entity_name)?;
        validate_field("entity type", &device.entity_type)?;
        Ok(device)
    }

    /// Declare an active attribute reported by the device.
    pub fn with_attribute(mut self, name: impl Into<String>, attr_type: impl Into<String>) -> Self {
        self.attributes
            .insert(name.into(), ContextAttribute::new(attr_type, Value::Null));
        self
    }

    /// Declare a static attribute copied into the bound entity.
    pub fn with_static_attribute(mut self, name: impl Into<String>, attr: ContextAttribute) -> Self {
        self.static_attributes.insert(name.into(), attr);
        self
    }

    /// Render the IoT agent's provisioning representation, which lists
    /// attributes as arrays of `{name, type[, value]}` objects.
    pub fn to_agent_payload(&self) -> Value {
        let attrs: Vec<Value> = self
            .attributes
            .iter()
            .map(|(name, attr)| serde_json::json!({"object_id": name, "name": name, "type": attr.attr_type}))
            .collect();
        let statics: Vec<Value> = self
            .static_attributes
            .iter()
            .map(|(name, attr)| serde_json::json!({"name": name, "type": attr.attr_type, "value": attr.value}))
            .collect();

        let mut payload = serde_json::json!({
            "device_id": self.device_id,
            "entity_name": self.entity_name,
            "entity_type": self.entity_type,
            "transport": self.transport,
            "protocol": self.protocol,
            "attributes": attrs,
            "static_attributes": statics,
        });
        if let Some(ref key) = self.apikey {
            payload["apikey"] = Value::String(key.clone());
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_normalized_roundtrip() {
        let raw = json!({
            "id": "Room1",
            "type": "Room",
            "temperature": {"type": "Number", "value": 23.5, "metadata": {}},
            "name": {"type": "Text", "value": "Kitchen"}
        });
        let entity: ContextEntity = serde_json::from_value(raw).unwrap();
        assert_eq!(entity.id, "Room1");
        assert_eq!(entity.attributes.len(), 2);
        assert_eq!(entity.attribute("temperature").unwrap().attr_type, "Number");

        let back = serde_json::to_value(&entity).unwrap();
        assert_eq!(back["name"]["value"], "Kitchen");
        assert!(back["temperature"].get("metadata").is_none());
    }

    #[test]
    fn test_field_validation() {
        assert!(ContextEntity::new("urn:ngsi-ld:Store:001", "Store").is_ok());
        assert!(ContextEntity::new("bad id", "Store").is_err());
        assert!(ContextEntity::new("Room1", "Ro;om").is_err());
        assert!(ContextEntity::new("", "Room").is_err());
    }

    #[test]
    fn test_fiware_header_rules() {
        assert!(FiwareHeader::new("smart_city", "/berlin/mitte").is_ok());
        assert!(FiwareHeader::new("", "/").is_ok());
        assert!(FiwareHeader::new("SmartCity", "/").is_err());
        assert!(FiwareHeader::new("city", "berlin").is_err());
        assert!(FiwareHeader::new("city", "/berlin//mitte").is_err());
    }

    #[test]
    fn test_entity_pattern_validation() {
        assert!(EntityPattern::of_type("Room").validate().is_ok());

        let both = EntityPattern {
            id: Some("Room1".into()),
            id_pattern: Some(".*".into()),
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let bad_regex = EntityPattern {
            id_pattern: Some("(".into()),
            ..Default::default()
        };
        assert!(bad_regex.validate().is_err());
    }

    #[test]
    fn test_infer_attribute_types() {
        assert_eq!(ContextAttribute::infer(json!(1)).attr_type, "Number");
        assert_eq!(ContextAttribute::infer(json!("x")).attr_type, "Text");
        assert_eq!(ContextAttribute::infer(json!(true)).attr_type, "Boolean");
        assert_eq!(ContextAttribute::infer(json!({"a": 1})).attr_type, "StructuredValue");
    }

    #[test]
    fn test_device_agent_payload() {
        let device = Device::new("sensor001", "urn:Room:1", "Room", DeviceTransport::Mqtt, "IoTA-JSON")
            .unwrap()
            .with_attribute("temperature", "Number")
            .with_static_attribute("floor", ContextAttribute::number(2));

        let payload = device.to_agent_payload();
        assert_eq!(payload["transport"], "MQTT");
        assert_eq!(payload["attributes"][0]["name"], "temperature");
        assert_eq!(payload["static_attributes"][0]["value"], 2);
        assert!(payload.get("apikey").is_none());
    }
}
