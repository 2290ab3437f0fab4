mod dirs;
mod settings;
mod validation;

pub use dirs::default_config_path;
pub use settings::{
    CollaboratorConfig, CollaboratorKind, Config, EndpointConfig, HostConfig, HubConfig,
    TransportConfig,
};
pub use validation::warn_unknown_fields;
