//! Partial updates of entity and device snapshots.

use crate::error::{ClientError, Result};
use crate::types::{ContextAttribute, ContextEntity, Device, DeviceTransport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attributes to merge into an entity. Attributes not named are untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityPatch {
    pub attributes: BTreeMap<String, ContextAttribute>,
}

impl EntityPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to the patch.
    pub fn with(mut self, name: impl Into<String>, attr: ContextAttribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Names of the patched attributes, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// Partial update of a provisioned device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePatch {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, ContextAttribute>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub static_attributes: BTreeMap<String, ContextAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<DeviceTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl DevicePatch {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
            && self.static_attributes.is_empty()
            && self.transport.is_none()
            && self.protocol.is_none()
    }
}

/// Merge `patch` into a copy of `entity`.
///
/// Fails if a patched attribute declares a type different from the
/// attribute it replaces. The input snapshot is never modified.
pub fn apply_patch(entity: &ContextEntity, patch: &EntityPatch) -> Result<ContextEntity> {
    let attributes = merge_attributes(&entity.to_string(), &entity.attributes, &patch.attributes)?;
    Ok(ContextEntity {
        id: entity.id.clone(),
        entity_type: entity.entity_type.clone(),
        attributes,
    })
}

/// Minimal patch turning `old` into `new`: every attribute that was added
/// or whose type, value or metadata changed. Removed attributes cannot be
/// expressed by a patch and are ignored.
pub fn diff(old: &ContextEntity, new: &ContextEntity) -> Result<EntityPatch> {
    if !old.same_identity(new) {
        return Err(ClientError::Validation(format!(
            "cannot diff {} against {}",
            old, new
        )));
    }
    Ok(EntityPatch {
        attributes: changed_attributes(&old.attributes, &new.attributes),
    })
}

/// Merge a device patch into a copy of `device`, with the same type rule
/// as [`apply_patch`].
pub fn apply_device_patch(device: &Device, patch: &DevicePatch) -> Result<Device> {
    let owner = format!("device {}", device.device_id);
    let attributes = merge_attributes(&owner, &device.attributes, &patch.attributes)?;
    let static_attributes =
        merge_attributes(&owner, &device.static_attributes, &patch.static_attributes)?;

    Ok(Device {
        attributes,
        static_attributes,
        transport: patch.transport.unwrap_or(device.transport),
        protocol: patch.protocol.clone().unwrap_or_else(|| device.protocol.clone()),
        ..device.clone()
    })
}

/// Minimal device patch turning `old` into `new`.
pub fn diff_devices(old: &Device, new: &Device) -> Result<DevicePatch> {
    if old.device_id != new.device_id {
        return Err(ClientError::Validation(format!(
            "cannot diff device {} against device {}",
            old.device_id, new.device_id
        )));
    }
    Ok(DevicePatch {
        attributes: changed_attributes(&old.attributes, &new.attributes),
        static_attributes: changed_attributes(&old.static_attributes, &new.static_attributes),
        transport: (old.transport != new.transport).then_some(new.transport),
        protocol: (old.protocol != new.protocol).then(|| new.protocol.clone()),
    })
}

fn merge_attributes(
    owner: &str,
    current: &BTreeMap<String, ContextAttribute>,
    patch: &BTreeMap<String, ContextAttribute>,
) -> Result<BTreeMap<String, ContextAttribute>> {
    let mut merged = current.clone();
    for (name, attr) in patch {
        if let Some(existing) = current.get(name) {
            if existing.attr_type != attr.attr_type {
                return Err(ClientError::Validation(format!(
                    "attribute {:?} of {} has type {}, patch declares {}",
                    name, owner, existing.attr_type, attr.attr_type
                )));
            }
        }
        merged.insert(name.clone(), attr.clone());
    }
    Ok(merged)
}

fn changed_attributes(
    old: &BTreeMap<String, ContextAttribute>,
    new: &BTreeMap<String, ContextAttribute>,
) -> BTreeMap<String, ContextAttribute> {
    new.iter()
        .filter(|(name, attr)| old.get(*name) != Some(*attr))
        .map(|(name, attr)| (name.clone(), attr.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> ContextEntity {
        ContextEntity::new("Room1", "Room")
            .unwrap()
            .with_attribute("temperature", ContextAttribute::number(20))
            .with_attribute("name", ContextAttribute::text("Kitchen"))
    }

    #[test]
    fn test_patch_touches_only_named_attributes() {
        let entity = room();
        let patch = EntityPatch::new().with("temperature", ContextAttribute::number(25));

        let patched = apply_patch(&entity, &patch).unwrap();
        assert_eq!(patched.attribute("temperature").unwrap().value, json!(25));
        assert_eq!(patched.attribute("name"), entity.attribute("name"));
        // original snapshot untouched
        assert_eq!(entity.attribute("temperature").unwrap().value, json!(20));
    }

    #[test]
    fn test_patch_adds_new_attribute() {
        let patch = EntityPatch::new().with("humidity", ContextAttribute::number(40));
        let patched = apply_patch(&room(), &patch).unwrap();
        assert_eq!(patched.attributes.len(), 3);
    }

    #[test]
    fn test_patch_type_conflict() {
        let patch = EntityPatch::new().with("temperature", ContextAttribute::text("warm"));
        let result = apply_patch(&room(), &patch);
        assert!(matches!(result, Err(ClientError::Validation(_))));
    }

    #[test]
    fn test_patch_idempotent() {
        let patch = EntityPatch::new()
            .with("temperature", ContextAttribute::number(30))
            .with("pressure", ContextAttribute::number(1013));
        let once = apply_patch(&room(), &patch).unwrap();
        let twice = apply_patch(&once, &patch).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_diff_minimal() {
        let old = room();
        let new = apply_patch(
            &old,
            &EntityPatch::new()
                .with("temperature", ContextAttribute::number(22))
                .with("name", ContextAttribute::text("Kitchen")),
        )
        .unwrap();

        let delta = diff(&old, &new).unwrap();
        assert_eq!(delta.names().collect::<Vec<_>>(), vec!["temperature"]);
        assert_eq!(apply_patch(&old, &delta).unwrap(), new);
    }

    #[test]
    fn test_diff_identity_mismatch() {
        let other = ContextEntity::new("Room2", "Room").unwrap();
        assert!(diff(&room(), &other).is_err());
    }

    #[test]
    fn test_device_patch() {
        let device = Device::new("sensor1", "Room1", "Room", DeviceTransport::Mqtt, "IoTA-UL")
            .unwrap()
            .with_attribute("temperature", "Number");
        let mut updated = device.clone().with_attribute("humidity", "Number");
        updated.protocol = "IoTA-JSON".to_string();

        let patch = diff_devices(&device, &updated).unwrap();
        assert_eq!(patch.attributes.len(), 1);
        assert_eq!(patch.protocol.as_deref(), Some("IoTA-JSON"));
        assert!(patch.transport.is_none());

        assert_eq!(apply_device_patch(&device, &patch).unwrap(), updated);

        let conflicting = DevicePatch {
            attributes: BTreeMap::from([("temperature".to_string(), ContextAttribute::new("Text", json!(null)))]),
            ..Default::default()
        };
        assert!(apply_device_patch(&device, &conflicting).is_err());
    }
}
