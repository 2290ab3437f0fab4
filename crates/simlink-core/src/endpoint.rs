//! Named attachment points that broker one remote and its collaborators.
//!
//! An endpoint owns at most one [`FramedSocket`], handed over by the hub. Each
//! host step calls [`Endpoint::pre_update`] before the endpoint's
//! collaborators tick and [`Endpoint::post_update`] after them. Both walk the
//! endpoint's [`Schedule`] until a yield-class operation hands control back:
//!
//! | op             | pre-update                   | post-update            |
//! |----------------|------------------------------|------------------------|
//! | `receive`      | one document in, fan out     | same                   |
//! | `send`         | collect subtrees, one out    | same                   |
//! | `yieldToUsers` | return                       | illegal, skipped       |
//! | `yield`        | step back, return            | return                 |
//!
//! A `yield` seen during pre-update acts as `yieldToUsers` and is left under
//! the cursor, so the post-update call returns on it right away. Post-update
//! also returns when the cursor wraps to the start of the schedule, leaving
//! the first operation to the next pre-update.
//!
//! `receive` blocks the host thread until a full document arrives. Network
//! failures drop the connection; schedule errors abort the current call and
//! keep it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};
use simlink_rpc::FramedSocket;
use tracing::{debug, error, info, trace, warn};

use crate::collaborator::{CollaboratorRegistration, Delivery, ReceiveCallback, SendCallback};
use crate::error::RegistrationError;
use crate::host::{CollaboratorId, EndpointId, OrderingHost, TickId};
use crate::schedule::{Schedule, ScheduleCursor};
use crate::{Phase, ScheduleOp, is_valid_tree_name};

/// How an [`Endpoint::advance`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Nothing attached; no work done.
    Idle,
    /// Control returned to the host at this operation.
    Yielded(ScheduleOp),
    /// The cursor wrapped back to where the call started without a yield.
    InvalidSchedule,
    /// A network operation failed and the connection was dropped.
    Disconnected,
}

/// A remote-controllable point in the simulation.
pub struct Endpoint {
    id: EndpointId,
    name: String,
    socket: Option<FramedSocket>,
    schedule: Schedule,
    cursor: ScheduleCursor,
    registrations: HashMap<CollaboratorId, CollaboratorRegistration>,
    /// Stale registrations whose orderings are still declared on the host.
    unretracted: Vec<CollaboratorId>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("schedule", &self.schedule)
            .field("cursor", &self.cursor.position())
            .field("collaborators", &self.registrations.len())
            .finish()
    }
}

impl Endpoint {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        let name = name.into();
        if !schedule.has_yield() {
            warn!("Schedule of '{name}' has no yield operation: {schedule}");
        }
        Self {
            id: EndpointId::next(),
            name,
            socket: None,
            schedule,
            cursor: ScheduleCursor::new(),
            registrations: HashMap::new(),
            unretracted: Vec::new(),
        }
    }

    /// Shorthand for an endpoint shared with a directory and a host.
    pub fn shared(name: impl Into<String>, schedule: Schedule) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(name, schedule)))
    }

    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    #[must_use]
    pub fn cursor(&self) -> ScheduleCursor {
        self.cursor
    }

    #[must_use]
    pub fn socket(&self) -> Option<&FramedSocket> {
        self.socket.as_ref()
    }

    #[must_use]
    pub fn collaborator_count(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_registered(&self, id: CollaboratorId) -> bool {
        self.registrations.contains_key(&id)
    }

    #[must_use]
    pub fn tree_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .registrations
            .values()
            .map(CollaboratorRegistration::tree_name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Socket attached and still good.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.socket.as_ref().is_some_and(FramedSocket::is_good)
    }

    /// Take ownership of a freshly dispatched connection.
    ///
    /// Replaces any current remote, switches reads to blocking without a
    /// timeout, restarts the schedule and resets the outbound document to one
    /// empty subtree per collaborator.
    pub fn attach(&mut self, mut socket: FramedSocket) {
        if self.socket.is_some() {
            warn!("'{}' already has a remote, replacing it", self.name);
        }

        socket.set_blocking(true, None);

        let mut subtrees = Map::new();
        for registration in self.registrations.values() {
            subtrees.insert(
                registration.tree_name().to_string(),
                Value::Object(Map::new()),
            );
        }
        *socket.out_document_mut() = Value::Object(subtrees);

        self.socket = Some(socket);
        self.cursor.reset();
        info!("Remote attached to '{}'", self.name);
    }

    /// Release the current remote, if any, and hand its socket back.
    pub fn detach(&mut self) -> Option<FramedSocket> {
        let socket = self.socket.take()?;
        info!("Remote detached from '{}'", self.name);
        Some(socket)
    }

    pub fn pre_update(&mut self, delta_time: f64) -> AdvanceOutcome {
        trace!("'{}' pre-update, dt={delta_time}", self.name);
        self.advance(Phase::PreUpdate)
    }

    pub fn post_update(&mut self, delta_time: f64) -> AdvanceOutcome {
        trace!("'{}' post-update, dt={delta_time}", self.name);
        self.advance(Phase::PostUpdate)
    }

    /// Run schedule operations until one hands control back to the host.
    pub fn advance(&mut self, phase: Phase) -> AdvanceOutcome {
        if !self.is_connected() {
            return AdvanceOutcome::Idle;
        }
        if self.schedule.is_empty() {
            error!("'{}' has an empty schedule", self.name);
            return AdvanceOutcome::InvalidSchedule;
        }

        let start = self.cursor.position();

        loop {
            let Some(op) = self.cursor.current(&self.schedule) else {
                return AdvanceOutcome::InvalidSchedule;
            };
            self.cursor.advance(&self.schedule);

            match op {
                ScheduleOp::Receive => {
                    if let Err(reason) = self.receive_document() {
                        self.drop_connection(&reason);
                        return AdvanceOutcome::Disconnected;
                    }
                }
                ScheduleOp::Send => {
                    if let Err(reason) = self.send_document() {
                        self.drop_connection(&reason);
                        return AdvanceOutcome::Disconnected;
                    }
                }
                ScheduleOp::YieldToUsers => match phase {
                    Phase::PreUpdate => return AdvanceOutcome::Yielded(op),
                    Phase::PostUpdate => {
                        error!(
                            "'{}': yieldToUsers is not allowed in the {phase} phase, ignoring it",
                            self.name
                        );
                    }
                },
                ScheduleOp::Yield => {
                    if phase == Phase::PreUpdate {
                        self.cursor.step_back(&self.schedule);
                    }
                    return AdvanceOutcome::Yielded(op);
                }
            }

            if self.cursor.position() == start {
                error!(
                    "'{}': invalid schedule {}, a full cycle ran without yielding",
                    self.name, self.schedule
                );
                return AdvanceOutcome::InvalidSchedule;
            }

            // The start of the schedule belongs to the next pre-update.
            if phase == Phase::PostUpdate && self.cursor.position() == 0 {
                trace!("'{}' post-update stopped at the end of the cycle", self.name);
                return AdvanceOutcome::Yielded(ScheduleOp::YieldToUsers);
            }
        }
    }

    /// Block for one document and fan it out.
    fn receive_document(&mut self) -> Result<(), String> {
        let Some(socket) = self.socket.as_mut() else {
            return Err("no remote attached".to_string());
        };

        let document = match socket.get_document() {
            Ok(Some(document)) => document,
            Ok(None) => return Err("connection lost while waiting for a document".to_string()),
            Err(e) => return Err(format!("failed to read document: {e}")),
        };

        let name = &self.name;
        let unretracted = &mut self.unretracted;
        self.registrations.retain(|id, registration| {
            let alive = registration.deliver_inbound(document, name) != Delivery::Stale;
            if !alive {
                debug!("Pruning stale collaborator '{}' of '{name}'", registration.tree_name());
                unretracted.push(*id);
            }
            alive
        });
        Ok(())
    }

    /// Collect every collaborator's subtree and send one document.
    fn send_document(&mut self) -> Result<(), String> {
        let Some(socket) = self.socket.as_mut() else {
            return Err("no remote attached".to_string());
        };

        let name = &self.name;
        let unretracted = &mut self.unretracted;
        let outbound = socket.out_document_mut();
        self.registrations.retain(|id, registration| {
            let alive = registration.collect_outbound(outbound, name) != Delivery::Stale;
            if !alive {
                debug!("Pruning stale collaborator '{}' of '{name}'", registration.tree_name());
                if let Value::Object(map) = &mut *outbound {
                    map.remove(registration.tree_name());
                }
                unretracted.push(*id);
            }
            alive
        });

        socket
            .put_document(None)
            .map_err(|e| format!("failed to send document: {e}"))
    }

    fn drop_connection(&mut self, reason: &str) {
        warn!("'{}' dropped its remote: {reason}", self.name);
        self.socket = None;
    }

    /// Hook a collaborator into this endpoint.
    ///
    /// Declares this endpoint's pre-update before the collaborator and its
    /// post-update after it. On failure nothing changes.
    ///
    /// # Errors
    ///
    /// Fails if the collaborator or the tree name is already registered, or
    /// if the tree name is not usable as a document key.
    pub fn register_collaborator<C: 'static>(
        &mut self,
        host: &mut dyn OrderingHost,
        collaborator: &Rc<RefCell<C>>,
        tree_name: &str,
        on_receive: Option<ReceiveCallback<C>>,
        on_send: Option<SendCallback<C>>,
    ) -> Result<CollaboratorId, RegistrationError> {
        self.sync_ordering(host);

        let id = CollaboratorId::of(collaborator);
        if self.registrations.contains_key(&id) {
            return Err(RegistrationError::DuplicateCollaborator {
                endpoint: self.name.clone(),
            });
        }
        if !is_valid_tree_name(tree_name) {
            return Err(RegistrationError::InvalidTreeName(tree_name.to_string()));
        }
        if self
            .registrations
            .values()
            .any(|r| r.tree_name() == tree_name)
        {
            return Err(RegistrationError::DuplicateTreeName {
                endpoint: self.name.clone(),
                tree_name: tree_name.to_string(),
            });
        }

        host.declare_ordering(TickId::EndpointPre(self.id), TickId::Collaborator(id));
        host.declare_ordering(TickId::Collaborator(id), TickId::EndpointPost(self.id));

        if let Some(socket) = self.socket.as_mut()
            && let Value::Object(map) = socket.out_document_mut()
        {
            map.entry(tree_name.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        self.registrations.insert(
            id,
            CollaboratorRegistration::new(collaborator, tree_name, on_receive, on_send),
        );
        debug!("Registered collaborator '{tree_name}' on '{}'", self.name);
        Ok(id)
    }

    /// Remove a collaborator and retract its orderings.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NotRegistered`] if it was never added.
    pub fn unregister_collaborator<C: ?Sized>(
        &mut self,
        host: &mut dyn OrderingHost,
        collaborator: &Rc<RefCell<C>>,
    ) -> Result<(), RegistrationError> {
        self.sync_ordering(host);

        let id = CollaboratorId::of(collaborator);
        let Some(registration) = self.registrations.remove(&id) else {
            return Err(RegistrationError::NotRegistered {
                endpoint: self.name.clone(),
            });
        };

        self.retract(host, id);
        if let Some(socket) = self.socket.as_mut()
            && let Value::Object(map) = socket.out_document_mut()
        {
            map.remove(registration.tree_name());
        }
        debug!(
            "Unregistered collaborator '{}' from '{}'",
            registration.tree_name(),
            self.name
        );
        Ok(())
    }

    /// Retract the orderings of collaborators pruned since the last call.
    ///
    /// Registration calls do this implicitly; hosts call it once per step.
    pub fn sync_ordering(&mut self, host: &mut dyn OrderingHost) {
        for id in std::mem::take(&mut self.unretracted) {
            self.retract(host, id);
        }

        let stale: Vec<CollaboratorId> = self
            .registrations
            .iter()
            .filter(|(_, r)| !r.is_alive())
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.registrations.remove(&id);
            self.retract(host, id);
        }
    }

    fn retract(&self, host: &mut dyn OrderingHost, id: CollaboratorId) {
        host.retract_ordering(TickId::EndpointPre(self.id), TickId::Collaborator(id));
        host.retract_ordering(TickId::Collaborator(id), TickId::EndpointPost(self.id));
    }
}
