//! Registry of named simulation objects that `CONNECT` can target.
//!
//! Entries keep weak handles; an object that has been dropped simply stops
//! matching. Objects without the endpoint capability may be listed too, so a
//! remote naming one gets a distinct "not connectable" failure instead of
//! "not found".

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::endpoint::Endpoint;
use crate::pattern::NamePattern;

#[derive(Debug, Clone)]
enum Target {
    Endpoint(Weak<RefCell<Endpoint>>),
    Opaque(Weak<dyn std::any::Any>),
}

impl Target {
    fn is_alive(&self) -> bool {
        match self {
            Self::Endpoint(weak) => weak.strong_count() > 0,
            Self::Opaque(weak) => weak.strong_count() > 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    target: Target,
}

/// Why a `CONNECT` pattern could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("No live object matches '{0}'")]
    NotFound(String),

    #[error("'{0}' cannot be remote controlled")]
    NotConnectable(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Named objects in registration order. The first match wins.
#[derive(Debug, Default, Clone)]
pub struct EndpointDirectory {
    entries: Vec<Entry>,
}

impl EndpointDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List an endpoint under its own name.
    pub fn add_endpoint(&mut self, endpoint: &Rc<RefCell<Endpoint>>) {
        let name = endpoint.borrow().name().to_string();
        self.push(name, Target::Endpoint(Rc::downgrade(endpoint)));
    }

    /// List an object that exists in the simulation but has no endpoint.
    pub fn add_opaque<T: 'static>(&mut self, name: impl Into<String>, object: &Rc<T>) {
        let any: Rc<dyn std::any::Any> = object.clone();
        self.push(name.into(), Target::Opaque(Rc::downgrade(&any)));
    }

    fn push(&mut self, name: String, target: Target) {
        self.entries.retain(|e| e.target.is_alive());
        if self.entries.iter().any(|e| e.name == name) {
            warn!("Duplicate object name '{name}', the earlier entry takes precedence");
        }
        self.entries.push(Entry { name, target });
    }

    /// Remove every entry with this name.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    /// Names of all live entries, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.target.is_alive())
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Live endpoints, in registration order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Rc<RefCell<Endpoint>>> {
        self.entries
            .iter()
            .filter_map(|e| match &e.target {
                Target::Endpoint(weak) => weak.upgrade(),
                Target::Opaque(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the endpoint for an exact name or `?`/`*` pattern.
    ///
    /// Only live entries are considered. Further matches after the first are
    /// logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] if nothing matches and
    /// [`ResolveError::NotConnectable`] if the first match has no endpoint.
    pub fn resolve(&self, pattern: &str) -> Result<Rc<RefCell<Endpoint>>, ResolveError> {
        let matcher = NamePattern::new(pattern).map_err(|e| ResolveError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let mut matches = self
            .entries
            .iter()
            .filter(|e| e.target.is_alive() && matcher.is_match(&e.name));

        let Some(first) = matches.next() else {
            return Err(ResolveError::NotFound(pattern.to_string()));
        };
        for ignored in matches {
            warn!(
                "'{pattern}' also matches '{}', using '{}'",
                ignored.name, first.name
            );
        }

        match &first.target {
            Target::Endpoint(weak) => weak
                .upgrade()
                .ok_or_else(|| ResolveError::NotFound(pattern.to_string())),
            Target::Opaque(_) => Err(ResolveError::NotConnectable(first.name.clone())),
        }
    }
}
