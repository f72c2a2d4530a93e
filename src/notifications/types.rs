//! Decoded notification types.

use crate::entities::{apply_patch, EntityPatch};
use crate::error::{ClientError, Result};
use crate::subscriptions::SubscriptionId;
use crate::types::ContextEntity;

/// How a notification was delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Body of an HTTP callback.
    Http,
    /// Payload of an MQTT message received on `topic`.
    Mqtt { topic: String },
}

impl TransportKind {
    pub fn mqtt(topic: impl Into<String>) -> Self {
        TransportKind::Mqtt {
            topic: topic.into(),
        }
    }
}

/// Changed attributes of one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityDelta {
    pub id: String,
    pub entity_type: String,
    pub patch: EntityPatch,
}

impl EntityDelta {
    /// Apply this delta to a cached snapshot of the same entity.
    pub fn apply_to(&self, entity: &ContextEntity) -> Result<ContextEntity> {
        if entity.id != self.id || entity.entity_type != self.entity_type {
            return Err(ClientError::Validation(format!(
                "delta for {}({}) applied to {}",
                self.entity_type, self.id, entity
            )));
        }
        apply_patch(entity, &self.patch)
    }

    /// Snapshot holding only the attributes carried by this delta.
    pub fn to_entity(&self) -> Result<ContextEntity> {
        let empty = ContextEntity::new(self.id.clone(), self.entity_type.clone())?;
        apply_patch(&empty, &self.patch)
    }
}

/// A decoded notification. Deltas keep payload order.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub subscription_id: SubscriptionId,
    pub deltas: Vec<EntityDelta>,
}

impl Notification {
    /// Apply every delta for `entity` in order.
    pub fn apply_to(&self, entity: &ContextEntity) -> Result<ContextEntity> {
        let mut current = entity.clone();
        for delta in self
            .deltas
            .iter()
            .filter(|d| d.id == entity.id && d.entity_type == entity.entity_type)
        {
            current = delta.apply_to(&current)?;
        }
        Ok(current)
    }
}
