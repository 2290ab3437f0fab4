use crate::schedule::Schedule;
use crate::{Result, ScheduleOp};
use serde::{Deserialize, Serialize};
use simlink_rpc::{DEFAULT_HANDSHAKE, DEFAULT_PORT, DEFAULT_READ_CHUNK};
use std::path::Path;
use tracing::warn;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            transport: TransportConfig::default(),
            host: HostConfig::default(),
            endpoints: default_endpoints(),
        }
    }
}

/// A single echo endpoint, so a fresh install can be exercised right away.
fn default_endpoints() -> Vec<EndpointConfig> {
    vec![EndpointConfig {
        name: "Echo".to_string(),
        schedule: default_schedule_ops(),
        trailing_yields: default_trailing_yields(),
        collaborators: vec![
            CollaboratorConfig {
                kind: CollaboratorKind::Echo,
                tree_name: "echo".to_string(),
            },
            CollaboratorConfig {
                kind: CollaboratorKind::Clock,
                tree_name: "clock".to_string(),
            },
        ],
    }]
}

impl Config {
    /// Load config from file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config: Self = serde_json::from_str(&content)?;
        config.warn_questionable();
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Find an endpoint section by name
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    fn warn_questionable(&self) {
        for endpoint in &self.endpoints {
            if !endpoint.schedule().has_yield() {
                warn!(
                    "Endpoint '{}' has no yield in its schedule and will stall every step",
                    endpoint.name
                );
            }
        }
        let mut names: Vec<&str> = self.endpoints.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                warn!("Endpoint name '{}' is used more than once", pair[0]);
            }
        }
        if self.host.tick_rate_hz <= 0.0 {
            warn!("tickRateHz must be positive, running unpaced");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_true")]
    pub listen_only_on_localhost: bool,

    /// Requested send and receive buffer size for accepted connections
    #[serde(default = "default_socket_buffer_size")]
    pub socket_buffer_size: usize,

    #[serde(default = "default_handshake")]
    pub handshake: String,
}

fn default_listen_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_socket_buffer_size() -> usize {
    64 * 1024
}

fn default_handshake() -> String {
    DEFAULT_HANDSHAKE.to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            listen_only_on_localhost: default_true(),
            socket_buffer_size: default_socket_buffer_size(),
            handshake: default_handshake(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Dump all raw traffic at trace level
    #[serde(default)]
    pub log_all_communications: bool,
}

fn default_read_chunk_size() -> usize {
    DEFAULT_READ_CHUNK
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            log_all_communications: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: f64,
}

fn default_tick_rate() -> f64 {
    60.0
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate(),
        }
    }
}

impl HostConfig {
    /// Simulated seconds per step, zero when unpaced
    #[must_use]
    pub fn delta_time(&self) -> f64 {
        if self.tick_rate_hz > 0.0 {
            1.0 / self.tick_rate_hz
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub name: String,

    #[serde(default = "default_schedule_ops")]
    pub schedule: Vec<ScheduleOp>,

    #[serde(default = "default_trailing_yields")]
    pub trailing_yields: usize,

    #[serde(default)]
    pub collaborators: Vec<CollaboratorConfig>,
}

fn default_schedule_ops() -> Vec<ScheduleOp> {
    Schedule::default().ops
}

fn default_trailing_yields() -> usize {
    Schedule::default().trailing_yields
}

impl EndpointConfig {
    #[must_use]
    pub fn schedule(&self) -> Schedule {
        Schedule::new(self.schedule.clone(), self.trailing_yields)
    }
}

/// Built-in collaborator kinds the daemon can attach to an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollaboratorKind {
    /// Reflects the last inbound subtree back to the remote
    Echo,
    /// Reports the step count and simulated time
    Clock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorConfig {
    pub kind: CollaboratorKind,
    pub tree_name: String,
}
