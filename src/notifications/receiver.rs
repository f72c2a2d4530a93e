//! Decoding of inbound notification payloads.

use crate::entities::EntityPatch;
use crate::error::{ClientError, Result};
use crate::subscriptions::{Subscription, SubscriptionId, SubscriptionManager};
use crate::types::{AttrsFormat, ContextAttribute};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::types::{EntityDelta, Notification, TransportKind};

/// Turns raw notification bodies into [`Notification`]s and checks them
/// against the tracked subscriptions.
///
/// Holds only a shared handle to the manager and performs read-only
/// lookups, so one receiver can serve concurrent deliveries.
#[derive(Clone)]
pub struct NotificationReceiver {
    subscriptions: Arc<SubscriptionManager>,
}

fn decode_error(msg: impl Into<String>) -> ClientError {
    ClientError::Decode(msg.into())
}

impl NotificationReceiver {
    pub fn new(subscriptions: Arc<SubscriptionManager>) -> Self {
        Self { subscriptions }
    }

    /// Decode `raw` delivered over `kind`.
    ///
    /// Expected body: `{"subscriptionId": "...", "data": [entity, ...]}`
    /// with entities in the format the subscription asked for.
    pub fn decode(&self, raw: &[u8], kind: &TransportKind) -> Result<Notification> {
        let body: Value = serde_json::from_slice(raw)
            .map_err(|e| decode_error(format!("notification is not JSON: {}", e)))?;
        let body = body
            .as_object()
            .ok_or_else(|| decode_error("notification is not an object"))?;

        let raw_id = body
            .get("subscriptionId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| decode_error("notification without subscriptionId"))?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| decode_error("notification data is not an array"))?;

        let subscription_id =
            SubscriptionId::new(raw_id).map_err(|e| decode_error(e.to_string()))?;
        let subscription = self
            .subscriptions
            .lookup(&subscription_id)
            .ok_or_else(|| ClientError::UnknownSubscription(raw_id.to_string()))?;

        check_delivery(&subscription, kind)?;

        let deltas = data
            .iter()
            .enumerate()
            .map(|(i, fragment)| decode_fragment(i, fragment, subscription.request.attrs_format))
            .collect::<Result<Vec<_>>>()?;

        debug!(subscription_id = %subscription_id, deltas = deltas.len(), "notification decoded");
        Ok(Notification {
            subscription_id,
            deltas,
        })
    }

    /// True if notifications for `id` would be accepted.
    pub fn accepts(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.is_tracked(id)
    }
}

/// The delivery channel must be the one bound at creation. Custom targets
/// deliver like their plain counterparts.
fn check_delivery(subscription: &Subscription, kind: &TransportKind) -> Result<()> {
    let target = &subscription.request.target;
    match (target.mqtt_topic(), kind) {
        (None, TransportKind::Http) => Ok(()),
        (Some(bound), TransportKind::Mqtt { topic }) => {
            if bound == topic {
                Ok(())
            } else {
                Err(decode_error(format!(
                    "notification on topic {:?}, subscription is bound to {:?}",
                    topic, bound
                )))
            }
        }
        (_, kind) => Err(decode_error(format!(
            "notification delivered over {:?}, subscription targets {:?}",
            kind, target
        ))),
    }
}

fn decode_fragment(index: usize, fragment: &Value, format: AttrsFormat) -> Result<EntityDelta> {
    let fields = fragment
        .as_object()
        .ok_or_else(|| decode_error(format!("entity fragment {} is not an object", index)))?;

    let id = string_field(fields, "id", index)?;
    let entity_type = string_field(fields, "type", index)?;

    let mut patch = EntityPatch::new();
    for (name, value) in fields {
        if name == "id" || name == "type" {
            continue;
        }
        let attr = match format {
            AttrsFormat::Normalized => normalized_attribute(index, name, value)?,
            AttrsFormat::KeyValues => ContextAttribute::infer(value.clone()),
            AttrsFormat::Values => {
                return Err(decode_error(
                    "values format carries no attribute names and cannot be decoded",
                ))
            }
        };
        patch = patch.with(name.clone(), attr);
    }

    Ok(EntityDelta {
        id,
        entity_type,
        patch,
    })
}

fn string_field(fields: &Map<String, Value>, key: &str, index: usize) -> Result<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| decode_error(format!("entity fragment {} without string {:?}", index, key)))
}

fn normalized_attribute(index: usize, name: &str, value: &Value) -> Result<ContextAttribute> {
    if value.get("type").and_then(Value::as_str).is_none() {
        return Err(decode_error(format!(
            "attribute {:?} of entity fragment {} has no type",
            name, index
        )));
    }
    serde_json::from_value(value.clone()).map_err(|e| {
        decode_error(format!(
            "attribute {:?} of entity fragment {}: {}",
            name, index, e
        ))
    })
}
