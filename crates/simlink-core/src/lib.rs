pub mod collaborator;
pub mod config;
pub mod directory;
pub mod endpoint;
pub mod host;
pub mod pattern;
pub mod schedule;

mod error;

#[cfg(test)]
mod tests;

pub use collaborator::{CollaboratorRegistration, Delivery, ReceiveCallback, SendCallback};
pub use directory::{EndpointDirectory, ResolveError};
pub use endpoint::{AdvanceOutcome, Endpoint};
pub use error::{Error, RegistrationError, Result};
pub use host::{CollaboratorId, EndpointId, OrderingHost, TickGraph, TickId};
pub use pattern::NamePattern;
pub use schedule::{Schedule, ScheduleCursor};

pub use simlink_types::*;
