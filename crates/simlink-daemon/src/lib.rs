//! SimLink daemon library: the connection dispatch hub and the host loop.
//!
//! The daemon binds a TCP listener, routes each incoming connection to the
//! endpoint its `CONNECT` line names, and steps the simulation so endpoints
//! exchange documents with their remotes in lock-step.

pub mod collaborators;
pub mod error;
pub mod hub;
pub mod server;
pub(crate) mod session;

pub use collaborators::{Clock, Echo, Tick};
pub use error::{DaemonError, HubError, Result};
pub use hub::{ConnectionDispatchHub, HubOptions, PollSummary};
pub use server::{Simulation, StepReport, run};
pub use session::{ConnectionId, PendingConnection};
