//! Common utilities and types shared across chorano

pub mod config;
pub mod error;
pub mod utils;
pub mod wire;

pub use config::{ClientConfig, Config, CoordinationConfig, ServerConfig};
pub use error::{Error, Result};
pub use utils::{is_child_of, join_path, node_name, parent_path, validate_path};
