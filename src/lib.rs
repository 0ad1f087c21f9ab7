//! # chorano
//!
//! Service discovery over a hierarchical coordination service:
//! - Servers register themselves as ephemeral sequential nodes
//! - Clients watch the registry and keep a live membership view
//! - Requests are spread round-robin across whatever is live
//! - A `stop` request shuts a server down gracefully
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Coordination service             │
//! │   /chorano                (persistent)  │
//! │     ├─ x_0000000000  "localhost:8111"   │
//! │     └─ x_0000000001  "localhost:8112"   │
//! └──────▲──────────────────────▲───────────┘
//!        │ ephemeral node       │ watches
//!        │ per session          │ (one-shot, re-armed)
//! ┌──────┴─────┐         ┌──────┴──────────────┐
//! │  Server    │◄────────┤  Client             │
//! │  accept +  │  POST   │  MembershipTracker  │
//! │  workers   │         │  + Dispatcher       │
//! └────────────┘         └─────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the coordination service
//! ```bash
//! chorano-coord serve --bind 127.0.0.1:2181
//! ```
//!
//! ### Start servers
//! ```bash
//! chorano-server serve --port 8111
//! chorano-server serve --port 8112
//! ```
//!
//! ### Drive load, inspect, stop
//! ```bash
//! chorano-client run --requests 10
//! chorano-client list
//! chorano-client stop localhost:8111
//! ```

pub mod client;
pub mod common;
pub mod coordination;
pub mod server;

// Re-export commonly used types
pub use client::{Dispatcher, MembershipTracker, RegistryView};
pub use common::{Config, Error, Result};
pub use coordination::{CoordService, Coordination, CreateMode, Namespace, WatchEvent};
pub use server::{HttpEchoHandler, Registrar, ServerLifecycle, SocketServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
