//! Collaborator registrations held by an endpoint.
//!
//! A registration keeps only a [`Weak`] handle to its collaborator. When the
//! collaborator is gone the callbacks are skipped and the registration is
//! reported as stale so the endpoint can prune it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::warn;

use crate::host::CollaboratorId;

/// Called with the collaborator's inbound subtree, or `None` if the
/// document did not contain one.
pub type ReceiveCallback<C> = Box<dyn FnMut(&mut C, Option<&Value>)>;

/// Called with the collaborator's outbound subtree to fill in.
pub type SendCallback<C> = Box<dyn FnMut(&mut C, &mut Value)>;

/// Result of delivering one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The callback ran, or the slot is a no-op.
    Delivered,
    /// The collaborator is currently borrowed elsewhere; skipped this time.
    Busy,
    /// The collaborator no longer exists.
    Stale,
}

trait Slot {
    fn is_alive(&self) -> bool;
    fn receive(&mut self, subtree: Option<&Value>) -> Delivery;
    fn send(&mut self, subtree: &mut Value) -> Delivery;
}

struct TypedSlot<C> {
    target: Weak<RefCell<C>>,
    on_receive: Option<ReceiveCallback<C>>,
    on_send: Option<SendCallback<C>>,
}

impl<C> TypedSlot<C> {
    fn with_target(&self, f: impl FnOnce(&mut C)) -> Delivery {
        let Some(target) = self.target.upgrade() else {
            return Delivery::Stale;
        };
        let Ok(mut guard) = target.try_borrow_mut() else {
            return Delivery::Busy;
        };
        f(&mut guard);
        Delivery::Delivered
    }
}

impl<C> Slot for TypedSlot<C> {
    fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    fn receive(&mut self, subtree: Option<&Value>) -> Delivery {
        let Some(mut callback) = self.on_receive.take() else {
            return if self.is_alive() {
                Delivery::Delivered
            } else {
                Delivery::Stale
            };
        };
        let outcome = self.with_target(|target| callback(target, subtree));
        self.on_receive = Some(callback);
        outcome
    }

    fn send(&mut self, subtree: &mut Value) -> Delivery {
        let Some(mut callback) = self.on_send.take() else {
            return if self.is_alive() {
                Delivery::Delivered
            } else {
                Delivery::Stale
            };
        };
        let outcome = self.with_target(|target| callback(target, subtree));
        self.on_send = Some(callback);
        outcome
    }
}

/// One collaborator's hook into an endpoint.
pub struct CollaboratorRegistration {
    id: CollaboratorId,
    tree_name: String,
    slot: Box<dyn Slot>,
}

impl std::fmt::Debug for CollaboratorRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorRegistration")
            .field("id", &self.id)
            .field("tree_name", &self.tree_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl CollaboratorRegistration {
    /// Build a registration for `collaborator`. Either callback may be `None`.
    pub fn new<C: 'static>(
        collaborator: &Rc<RefCell<C>>,
        tree_name: impl Into<String>,
        on_receive: Option<ReceiveCallback<C>>,
        on_send: Option<SendCallback<C>>,
    ) -> Self {
        Self {
            id: CollaboratorId::of(collaborator),
            tree_name: tree_name.into(),
            slot: Box::new(TypedSlot {
                target: Rc::downgrade(collaborator),
                on_receive,
                on_send,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> CollaboratorId {
        self.id
    }

    #[must_use]
    pub fn tree_name(&self) -> &str {
        &self.tree_name
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.slot.is_alive()
    }

    /// Hand the matching subtree of `document` to the receive callback.
    ///
    /// A missing subtree is delivered as `None` and logged.
    pub fn deliver_inbound(&mut self, document: &Value, endpoint: &str) -> Delivery {
        let subtree = document.get(&self.tree_name);
        if subtree.is_none() && self.is_alive() {
            warn!(
                "Inbound document for '{endpoint}' has no '{}' subtree",
                self.tree_name
            );
        }
        let delivery = self.slot.receive(subtree);
        self.log_busy(delivery, endpoint)
    }

    /// Let the send callback fill this collaborator's subtree of `document`.
    ///
    /// `document` is turned into an object if it is not one already; the
    /// subtree is created empty on first use and persists between calls.
    pub fn collect_outbound(&mut self, document: &mut Value, endpoint: &str) -> Delivery {
        if !document.is_object() {
            *document = Value::Object(serde_json::Map::new());
        }
        let Value::Object(map) = document else {
            return Delivery::Delivered;
        };
        let subtree = map
            .entry(self.tree_name.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let delivery = self.slot.send(subtree);
        self.log_busy(delivery, endpoint)
    }

    fn log_busy(&self, delivery: Delivery, endpoint: &str) -> Delivery {
        if delivery == Delivery::Busy {
            warn!(
                "Collaborator '{}' of '{endpoint}' is busy, skipping its callback",
                self.tree_name
            );
        }
        delivery
    }
}
