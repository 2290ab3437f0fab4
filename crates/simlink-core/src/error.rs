use thiserror::Error;

use crate::host::TickId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid endpoint pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Ordering cycle through {0:?}")]
    OrderingCycle(Vec<TickId>),
}

/// Why a collaborator could not be registered or unregistered.
///
/// A failed call leaves the endpoint and the host ordering untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Collaborator is already registered on endpoint '{endpoint}'")]
    DuplicateCollaborator { endpoint: String },

    #[error("Tree name '{tree_name}' is already used on endpoint '{endpoint}'")]
    DuplicateTreeName { endpoint: String, tree_name: String },

    #[error("Invalid tree name '{0}'")]
    InvalidTreeName(String),

    #[error("Collaborator is not registered on endpoint '{endpoint}'")]
    NotRegistered { endpoint: String },
}

pub type Result<T> = std::result::Result<T, Error>;
