//! The simulation host loop.
//!
//! A [`Simulation`] owns the endpoints, their collaborators, the directory the
//! hub resolves names against and the tick graph. Each step polls the hub,
//! syncs ordering constraints and runs every tick in dependency order. All of
//! it lives on one thread.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use simlink_core::config::Config;
use simlink_core::{
    AdvanceOutcome, CollaboratorId, Endpoint, EndpointDirectory, EndpointId, ReceiveCallback,
    SendCallback, TickGraph, TickId,
};
use tracing::{debug, info, trace, warn};

use crate::collaborators::{Tick, instantiate};
use crate::error::Result;
use crate::hub::{ConnectionDispatchHub, HubOptions};

/// Counters for one host step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub dispatched: usize,
    pub yielded: usize,
    pub disconnected: usize,
    pub invalid: usize,
}

impl StepReport {
    fn record(&mut self, outcome: AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Idle => {}
            AdvanceOutcome::Yielded(_) => self.yielded += 1,
            AdvanceOutcome::InvalidSchedule => self.invalid += 1,
            AdvanceOutcome::Disconnected => self.disconnected += 1,
        }
    }
}

pub struct Simulation {
    hub: Option<ConnectionDispatchHub>,
    directory: EndpointDirectory,
    endpoints: HashMap<EndpointId, Rc<RefCell<Endpoint>>>,
    collaborators: HashMap<CollaboratorId, Rc<RefCell<dyn Tick>>>,
    /// Directory-only objects, kept alive for as long as the simulation.
    props: Vec<Rc<dyn Any>>,
    graph: TickGraph,
    delta_time: f64,
    steps: u64,
}

impl Simulation {
    /// An empty simulation without a hub.
    #[must_use]
    pub fn new(delta_time: f64) -> Self {
        Self {
            hub: None,
            directory: EndpointDirectory::new(),
            endpoints: HashMap::new(),
            collaborators: HashMap::new(),
            props: Vec::new(),
            graph: TickGraph::new(),
            delta_time,
            steps: 0,
        }
    }

    /// Build endpoints and built-in collaborators from `config` and bind the hub.
    ///
    /// # Errors
    ///
    /// Fails if the hub cannot bind or a collaborator cannot be registered.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut sim = Self::new(config.host.delta_time());

        for section in &config.endpoints {
            let endpoint = Endpoint::shared(&section.name, section.schedule());
            sim.add_endpoint(&endpoint);

            for collab in &section.collaborators {
                let (id, ticker) = instantiate(
                    collab.kind,
                    &mut endpoint.borrow_mut(),
                    &mut sim.graph,
                    &collab.tree_name,
                )?;
                sim.graph.add_node(TickId::Collaborator(id));
                sim.collaborators.insert(id, ticker);
            }
            info!(
                "Endpoint '{}' ready: {} with {} collaborator(s)",
                section.name,
                section.schedule(),
                section.collaborators.len()
            );
        }

        sim.hub = Some(ConnectionDispatchHub::bind(HubOptions::from(config))?);
        Ok(sim)
    }

    /// Address remotes connect to, when a hub is bound.
    #[must_use]
    pub fn hub_addr(&self) -> Option<SocketAddr> {
        self.hub.as_ref().and_then(|h| h.local_addr().ok())
    }

    #[must_use]
    pub fn directory(&self) -> &EndpointDirectory {
        &self.directory
    }

    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    #[must_use]
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Register an endpoint with the directory and the tick graph.
    pub fn add_endpoint(&mut self, endpoint: &Rc<RefCell<Endpoint>>) {
        let id = endpoint.borrow().id();
        self.graph.add_endpoint(id);
        self.directory.add_endpoint(endpoint);
        self.endpoints.insert(id, Rc::clone(endpoint));
    }

    /// List a named object in the directory that remotes cannot connect to.
    pub fn add_opaque(&mut self, name: impl Into<String>) {
        let prop = Rc::new(());
        let name = name.into();
        self.directory.add_opaque(&name, &prop);
        debug!("Added non-connectable object '{name}'");
        self.props.push(prop);
    }

    /// Tick `collaborator` each step and exchange its subtree through `endpoint`.
    ///
    /// # Errors
    ///
    /// Propagates the endpoint's registration error.
    pub fn add_collaborator<C: Tick + 'static>(
        &mut self,
        endpoint: &Rc<RefCell<Endpoint>>,
        collaborator: Rc<RefCell<C>>,
        tree_name: &str,
        on_receive: Option<ReceiveCallback<C>>,
        on_send: Option<SendCallback<C>>,
    ) -> Result<CollaboratorId> {
        let id = endpoint.borrow_mut().register_collaborator(
            &mut self.graph,
            &collaborator,
            tree_name,
            on_receive,
            on_send,
        )?;
        self.graph.add_node(TickId::Collaborator(id));
        self.collaborators.insert(id, collaborator);
        Ok(id)
    }

    /// Stop ticking `collaborator` and unhook it from `endpoint`.
    ///
    /// # Errors
    ///
    /// Fails if it was not registered on `endpoint`.
    pub fn remove_collaborator<C: ?Sized>(
        &mut self,
        endpoint: &Rc<RefCell<Endpoint>>,
        collaborator: &Rc<RefCell<C>>,
    ) -> Result<()> {
        endpoint
            .borrow_mut()
            .unregister_collaborator(&mut self.graph, collaborator)?;
        let id = CollaboratorId::of(collaborator);
        self.collaborators.remove(&id);
        self.graph.remove_node(TickId::Collaborator(id));
        Ok(())
    }

    /// Run one host step.
    ///
    /// # Errors
    ///
    /// Returns [`simlink_core::Error::OrderingCycle`] if the declared
    /// orderings cannot be satisfied.
    pub fn step(&mut self) -> Result<StepReport> {
        let mut report = StepReport::default();

        if let Some(hub) = self.hub.as_mut() {
            report.dispatched = hub.poll(&self.directory).dispatched;
        }

        for endpoint in self.endpoints.values() {
            endpoint.borrow_mut().sync_ordering(&mut self.graph);
        }

        let dt = self.delta_time;
        for tick in self.graph.order()? {
            match tick {
                TickId::EndpointPre(id) => {
                    if let Some(endpoint) = self.endpoints.get(&id) {
                        report.record(endpoint.borrow_mut().pre_update(dt));
                    }
                }
                TickId::Collaborator(id) => {
                    if let Some(collaborator) = self.collaborators.get(&id) {
                        collaborator.borrow_mut().tick(dt);
                    }
                }
                TickId::EndpointPost(id) => {
                    if let Some(endpoint) = self.endpoints.get(&id) {
                        report.record(endpoint.borrow_mut().post_update(dt));
                    }
                }
            }
        }

        self.steps += 1;
        trace!("Step {} done: {report:?}", self.steps);
        Ok(report)
    }

    /// Step until `max_steps` is reached or `shutdown` is set, pacing to the
    /// configured tick rate.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step.
    pub fn run(&mut self, max_steps: Option<u64>, shutdown: &AtomicBool) -> Result<()> {
        let period = (self.delta_time > 0.0).then(|| Duration::from_secs_f64(self.delta_time));
        let mut overruns = 0u64;

        while !shutdown.load(Ordering::Relaxed) && max_steps.is_none_or(|max| self.steps < max) {
            let started = Instant::now();
            let report = self.step()?;
            if report.invalid > 0 {
                warn!("{} endpoint(s) have an unusable schedule", report.invalid);
            }

            if let Some(period) = period {
                match period.checked_sub(started.elapsed()) {
                    Some(rest) => std::thread::sleep(rest),
                    None => overruns += 1,
                }
            }
        }

        if overruns > 0 {
            debug!("{overruns} step(s) ran longer than the tick period");
        }
        info!("Simulation stopped after {} step(s)", self.steps);
        Ok(())
    }
}

/// Build a simulation from `config` and run it on the calling thread.
///
/// # Errors
///
/// Fails if the simulation cannot be built or a step fails.
pub fn run(config: &Config, max_steps: Option<u64>, shutdown: &AtomicBool) -> Result<()> {
    let mut sim = Simulation::from_config(config)?;
    sim.run(max_steps, shutdown)
}
