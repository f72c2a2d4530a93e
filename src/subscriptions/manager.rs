//! Subscription manager: lifecycle tracking and broker round-trips.

use crate::client::ClientContext;
use crate::error::{ClientError, Result, TransportError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::types::{
    LocalId, Subscription, SubscriptionId, SubscriptionRequest, SubscriptionStatus,
    SubscriptionUpdate,
};

/// Registry guarded by a single lock so both maps change together.
#[derive(Default)]
struct Registry {
    /// Live subscriptions by local handle.
    subscriptions: HashMap<LocalId, Subscription>,
    /// Broker id to local handle, for correlation.
    by_broker_id: HashMap<SubscriptionId, LocalId>,
    /// Pending subscriptions abandoned before the broker answered.
    abandoned: HashMap<LocalId, Subscription>,
}

impl Registry {
    fn lookup(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.by_broker_id
            .get(id)
            .and_then(|local| self.subscriptions.get(local))
    }
}

/// Tracks subscriptions and drives their state machine.
///
/// Reads (`lookup`, `is_tracked`) run concurrently; state changes take the
/// write lock. Broker round-trips happen outside the lock.
pub struct SubscriptionManager {
    registry: RwLock<Registry>,
    /// Counter for generating local handles.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    // --- Creation ---

    /// Start tracking a new subscription in `pending` status.
    ///
    /// The request is validated and its query compiled first; nothing is
    /// tracked if that fails. The broker must then be asked to create it and
    /// its answer passed to [`acknowledge`](Self::acknowledge).
    pub fn create(&self, request: SubscriptionRequest) -> Result<Subscription> {
        request.to_payload()?;

        let local_id = LocalId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = Subscription {
            local_id,
            id: None,
            request,
            status: SubscriptionStatus::Pending,
            failure: None,
        };

        self.registry
            .write()
            .subscriptions
            .insert(local_id, subscription.clone());

        debug!(local_id = %local_id, "subscription pending");
        Ok(subscription)
    }

    /// Apply the broker's answer to a create request.
    ///
    /// - an id moves the subscription to `active`;
    /// - a rejection moves it to `failed` and returns the broker's reason;
    /// - any other transport failure means no answer was received, and the
    ///   pending record is dropped.
    ///
    /// A successful answer for an abandoned subscription still activates it.
    pub fn acknowledge(
        &self,
        local_id: LocalId,
        outcome: std::result::Result<String, TransportError>,
    ) -> Result<Subscription> {
        let mut registry = self.registry.write();

        let resurrected = match registry.subscriptions.get(&local_id) {
            Some(sub) if sub.status != SubscriptionStatus::Pending => {
                return Err(ClientError::InvalidTransition {
                    status: sub.status,
                    action: "acknowledge",
                });
            }
            Some(_) => false,
            None if registry.abandoned.contains_key(&local_id) => true,
            None => return Err(ClientError::NotRegistered(local_id.to_string())),
        };

        match outcome {
            Ok(raw_id) => {
                let mut subscription = if resurrected {
                    registry.abandoned.remove(&local_id)
                } else {
                    registry.subscriptions.remove(&local_id)
                }
                .ok_or_else(|| ClientError::NotRegistered(local_id.to_string()))?;

                let id = match SubscriptionId::new(raw_id) {
                    Ok(id) => id,
                    Err(_) => {
                        subscription.status = SubscriptionStatus::Failed;
                        subscription.failure = Some("broker returned an empty subscription id".to_string());
                        if !resurrected {
                            registry.subscriptions.insert(local_id, subscription);
                        }
                        warn!(local_id = %local_id, "create acknowledged without an id");
                        return Err(ClientError::Transport(TransportError::InvalidResponse(
                            "broker returned an empty subscription id".to_string(),
                        )));
                    }
                };

                subscription.id = Some(id.clone());
                subscription.status = SubscriptionStatus::Active;
                registry.by_broker_id.insert(id.clone(), local_id);
                registry.subscriptions.insert(local_id, subscription.clone());

                info!(local_id = %local_id, subscription_id = %id, "subscription active");
                Ok(subscription)
            }
            Err(TransportError::Rejected { status, body }) => {
                if resurrected {
                    registry.abandoned.remove(&local_id);
                } else if let Some(sub) = registry.subscriptions.get_mut(&local_id) {
                    sub.status = SubscriptionStatus::Failed;
                    sub.failure = Some(body.clone());
                }
                warn!(local_id = %local_id, status, reason = %body, "subscription rejected");
                Err(ClientError::Rejected {
                    status,
                    reason: body,
                })
            }
            Err(e) => {
                registry.subscriptions.remove(&local_id);
                registry.abandoned.remove(&local_id);
                warn!(local_id = %local_id, error = %e, "create request failed without an answer");
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Create a subscription and register it with the broker.
    pub fn register(&self, ctx: &ClientContext, request: SubscriptionRequest) -> Result<Subscription> {
        let pending = self.create(request)?;
        let payload = pending.request.to_payload()?;

        debug!(local_id = %pending.local_id, "sending create request");
        let outcome = ctx.transport().create_subscription(ctx.header(), &payload);
        self.acknowledge(pending.local_id, outcome)
    }

    /// Drop a pending subscription whose create request was cancelled.
    pub fn abandon(&self, local_id: LocalId) -> Result<Subscription> {
        let mut registry = self.registry.write();
        let status = match registry.subscriptions.get(&local_id) {
            Some(sub) => sub.status,
            None => return Err(ClientError::NotRegistered(local_id.to_string())),
        };
        if status != SubscriptionStatus::Pending {
            return Err(ClientError::InvalidTransition {
                status,
                action: "abandon",
            });
        }

        let mut subscription = registry
            .subscriptions
            .remove(&local_id)
            .ok_or_else(|| ClientError::NotRegistered(local_id.to_string()))?;
        subscription.status = SubscriptionStatus::Deleted;
        registry.abandoned.insert(local_id, subscription.clone());

        debug!(local_id = %local_id, "pending subscription abandoned");
        Ok(subscription)
    }

    /// Stop tracking a subscription the broker never registered: a failed
    /// create or an abandoned pending one.
    ///
    /// Registered subscriptions go through [`delete`](Self::delete). A late
    /// broker answer for a forgotten subscription is refused with
    /// `NotRegistered`.
    pub fn forget(&self, local_id: LocalId) -> Result<Subscription> {
        let mut registry = self.registry.write();
        if let Some(subscription) = registry.abandoned.remove(&local_id) {
            debug!(local_id = %local_id, "abandoned subscription forgotten");
            return Ok(subscription);
        }

        let (status, registered) = match registry.subscriptions.get(&local_id) {
            Some(sub) => (sub.status, sub.id.is_some()),
            None => return Err(ClientError::NotRegistered(local_id.to_string())),
        };
        if status != SubscriptionStatus::Failed || registered {
            return Err(ClientError::InvalidTransition {
                status,
                action: "forget",
            });
        }

        let subscription = registry
            .subscriptions
            .remove(&local_id)
            .ok_or_else(|| ClientError::NotRegistered(local_id.to_string()))?;
        debug!(local_id = %local_id, "failed subscription forgotten");
        Ok(subscription)
    }

    /// Drop every abandoned subscription still waiting for a broker answer.
    /// Returns how many were dropped.
    pub fn forget_abandoned(&self) -> usize {
        let mut registry = self.registry.write();
        let dropped = registry.abandoned.len();
        registry.abandoned.clear();
        if dropped > 0 {
            debug!(dropped, "abandoned subscriptions forgotten");
        }
        dropped
    }

    // --- Update / Delete ---

    /// Update a registered subscription.
    ///
    /// Only `active` subscriptions can be updated. A broker rejection makes
    /// the subscription `failed`; a transport failure leaves it unchanged.
    pub fn update(
        &self,
        ctx: &ClientContext,
        id: &SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let current = self
            .lookup(id)
            .ok_or_else(|| ClientError::NotRegistered(id.to_string()))?;
        if current.status != SubscriptionStatus::Active {
            return Err(ClientError::InvalidTransition {
                status: current.status,
                action: "update",
            });
        }

        let request = update.apply_to(&current.request);
        let payload = request.to_payload()?;

        debug!(subscription_id = %id, "sending update request");
        let outcome = ctx.transport().update_subscription(ctx.header(), id, &payload);

        let mut registry = self.registry.write();
        let subscription = registry
            .subscriptions
            .get_mut(&current.local_id)
            .ok_or_else(|| ClientError::NotRegistered(id.to_string()))?;

        match outcome {
            Ok(()) => {
                subscription.request = request;
                info!(subscription_id = %id, "subscription updated");
                Ok(subscription.clone())
            }
            Err(TransportError::Rejected { status, body }) => {
                subscription.status = SubscriptionStatus::Failed;
                subscription.failure = Some(body.clone());
                warn!(subscription_id = %id, status, reason = %body, "update rejected");
                Err(ClientError::Rejected {
                    status,
                    reason: body,
                })
            }
            Err(e) => Err(ClientError::Transport(e)),
        }
    }

    /// Update by local handle. Fails with `NotRegistered` while pending.
    pub fn update_local(
        &self,
        ctx: &ClientContext,
        local_id: LocalId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let id = self.broker_id_of(local_id)?;
        self.update(ctx, &id, update)
    }

    /// Delete a registered subscription from the broker and stop tracking it.
    ///
    /// A broker answer of 404 means it is already gone and counts as success.
    pub fn delete(&self, ctx: &ClientContext, id: &SubscriptionId) -> Result<Subscription> {
        let current = self
            .lookup(id)
            .ok_or_else(|| ClientError::NotRegistered(id.to_string()))?;

        debug!(subscription_id = %id, "sending delete request");
        match ctx.transport().delete_subscription(ctx.header(), id) {
            Ok(()) => {}
            Err(TransportError::Rejected { status: 404, .. }) => {
                warn!(subscription_id = %id, "subscription already gone on the broker");
            }
            Err(TransportError::Rejected { status, body }) => {
                return Err(ClientError::Rejected {
                    status,
                    reason: body,
                })
            }
            Err(e) => return Err(ClientError::Transport(e)),
        }

        let mut registry = self.registry.write();
        registry.by_broker_id.remove(id);
        let mut subscription = registry
            .subscriptions
            .remove(&current.local_id)
            .unwrap_or(current);
        subscription.status = SubscriptionStatus::Deleted;

        info!(subscription_id = %id, "subscription deleted");
        Ok(subscription)
    }

    /// Delete by local handle. Fails with `NotRegistered` while pending.
    pub fn delete_local(&self, ctx: &ClientContext, local_id: LocalId) -> Result<Subscription> {
        let id = self.broker_id_of(local_id)?;
        self.delete(ctx, &id)
    }

    /// Mark active subscriptions whose expiry is at or before `now` as
    /// expired. Returns the ids that changed.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<SubscriptionId> {
        let mut registry = self.registry.write();
        let mut expired = Vec::new();
        for sub in registry.subscriptions.values_mut() {
            let due = sub.request.expires.is_some_and(|at| at <= now);
            if sub.status == SubscriptionStatus::Active && due {
                sub.status = SubscriptionStatus::Expired;
                if let Some(ref id) = sub.id {
                    info!(subscription_id = %id, "subscription expired");
                    expired.push(id.clone());
                }
            }
        }
        expired
    }

    // --- Lookups ---

    /// Snapshot by local handle.
    pub fn get(&self, local_id: LocalId) -> Option<Subscription> {
        self.registry.read().subscriptions.get(&local_id).cloned()
    }

    /// Snapshot by broker id.
    pub fn lookup(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.registry.read().lookup(id).cloned()
    }

    /// True if the broker id belongs to a subscription tracked here.
    pub fn is_tracked(&self, id: &SubscriptionId) -> bool {
        self.registry.read().by_broker_id.contains_key(id)
    }

    /// All broker ids currently tracked, sorted.
    pub fn tracked_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.registry.read().by_broker_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of tracked subscriptions, pending ones included.
    pub fn subscription_count(&self) -> usize {
        self.registry.read().subscriptions.len()
    }

    /// Abandoned subscriptions still waiting for a late broker answer.
    pub fn abandoned_count(&self) -> usize {
        self.registry.read().abandoned.len()
    }

    fn broker_id_of(&self, local_id: LocalId) -> Result<SubscriptionId> {
        self.get(local_id)
            .and_then(|sub| sub.id)
            .ok_or_else(|| ClientError::NotRegistered(local_id.to_string()))
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
