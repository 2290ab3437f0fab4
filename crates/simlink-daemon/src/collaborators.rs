//! Built-in collaborators the daemon can hook into endpoints from config.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};
use simlink_core::config::CollaboratorKind;
use simlink_core::{CollaboratorId, Endpoint, OrderingHost, RegistrationError};
use tracing::debug;

/// Something the host ticks once per step, between the pre- and post-update
/// of every endpoint it is registered with.
pub trait Tick {
    fn tick(&mut self, delta_time: f64);
}

/// Reflects the last subtree it received back to the remote.
#[derive(Debug, Default)]
pub struct Echo {
    last: Option<Value>,
    ticks: u64,
}

impl Echo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Value> {
        self.last.as_ref()
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn on_receive(&mut self, subtree: Option<&Value>) {
        // A document without our subtree keeps the previous value.
        if let Some(subtree) = subtree {
            self.last = Some(subtree.clone());
        }
    }

    fn on_send(&mut self, subtree: &mut Value) {
        if let Some(last) = &self.last {
            subtree.clone_from(last);
        }
    }
}

impl Tick for Echo {
    fn tick(&mut self, _delta_time: f64) {
        self.ticks += 1;
    }
}

/// Counts steps and simulated seconds.
///
/// Sending `{"reset": true}` in its subtree zeroes both counters.
#[derive(Debug, Default)]
pub struct Clock {
    steps: u64,
    elapsed: f64,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    #[must_use]
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    fn on_receive(&mut self, subtree: Option<&Value>) {
        let reset = subtree
            .and_then(|s| s.get("reset"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if reset {
            debug!("Clock reset by remote");
            self.steps = 0;
            self.elapsed = 0.0;
        }
    }

    fn on_send(&mut self, subtree: &mut Value) {
        *subtree = json!({
            "steps": self.steps,
            "elapsed": self.elapsed,
        });
    }
}

impl Tick for Clock {
    fn tick(&mut self, delta_time: f64) {
        self.steps += 1;
        self.elapsed += delta_time;
    }
}

/// Build a collaborator of `kind` and register it on `endpoint`.
///
/// # Errors
///
/// Propagates the endpoint's registration error.
pub fn instantiate(
    kind: CollaboratorKind,
    endpoint: &mut Endpoint,
    host: &mut dyn OrderingHost,
    tree_name: &str,
) -> Result<(CollaboratorId, Rc<RefCell<dyn Tick>>), RegistrationError> {
    match kind {
        CollaboratorKind::Echo => {
            let echo = Rc::new(RefCell::new(Echo::new()));
            let id = endpoint.register_collaborator(
                host,
                &echo,
                tree_name,
                Some(Box::new(Echo::on_receive)),
                Some(Box::new(Echo::on_send)),
            )?;
            Ok((id, echo as Rc<RefCell<dyn Tick>>))
        }
        CollaboratorKind::Clock => {
            let clock = Rc::new(RefCell::new(Clock::new()));
            let id = endpoint.register_collaborator(
                host,
                &clock,
                tree_name,
                Some(Box::new(Clock::on_receive)),
                Some(Box::new(Clock::on_send)),
            )?;
            Ok((id, clock as Rc<RefCell<dyn Tick>>))
        }
    }
}
