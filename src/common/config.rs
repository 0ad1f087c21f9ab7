//! Configuration for chorano components
//!
//! Values come from serde defaults, then an optional TOML file, then
//! `CHORANO_*` environment variables (`__` separates sections, e.g.
//! `CHORANO_CLIENT__REQUEST_COUNT=20`). Binaries apply CLI flags last.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "chorano.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordination service connection
    pub coordination: CoordinationConfig,

    /// Server-side settings
    pub server: ServerConfig,

    /// Client-side settings
    pub client: ClientConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordination: CoordinationConfig::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Coordination service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Address of the coordination service (host:port)
    pub connect: String,

    /// Upper bound on session establishment
    pub session_timeout_ms: u64,

    /// Registry root every server registers under
    pub root: String,

    /// Listen address when running the coordination service itself
    pub bind_addr: SocketAddr,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            connect: "127.0.0.1:2181".to_string(),
            session_timeout_ms: 3000,
            root: "/chorano".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 2181)),
        }
    }
}

impl CoordinationConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening port; prompted for on stdin when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Host part of the location published in the registry
    pub advertise_host: String,

    /// Fixed worker pool size
    pub workers: usize,

    /// How often the accept loop re-checks the stop flag
    pub accept_poll_interval_ms: u64,

    /// Bounded drain period for in-flight work after a stop
    pub shutdown_grace_ms: u64,

    /// Largest request body a handler will read
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            advertise_host: "localhost".to_string(),
            workers: 4,
            accept_poll_interval_ms: 250,
            shutdown_grace_ms: 5000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Total requests dispatched per run
    pub request_count: u64,

    /// Per-request connect/write/read timeout
    pub request_timeout_ms: u64,

    /// Pause between passes over the view
    pub pass_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_count: 10,
            request_timeout_ms: 2000,
            pass_interval_ms: 5000,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pass_interval(&self) -> Duration {
        Duration::from_millis(self.pass_interval_ms)
    }
}

impl Config {
    /// Load configuration.
    ///
    /// With `path`, that file must exist. Without it, `chorano.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => {
                config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Toml).required(false)
            }
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("CHORANO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot run with
    pub fn validate(&self) -> Result<()> {
        crate::common::utils::validate_path(&self.coordination.root)?;

        if self.server.workers == 0 {
            return Err(Error::InvalidConfig(
                "server.workers must be at least 1".into(),
            ));
        }
        if self.server.accept_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "server.accept_poll_interval_ms must be positive".into(),
            ));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "client.request_timeout_ms must be positive".into(),
            ));
        }
        if self.server.advertise_host.is_empty() {
            return Err(Error::InvalidConfig(
                "server.advertise_host cannot be empty".into(),
            ));
        }

        Ok(())
    }
}
