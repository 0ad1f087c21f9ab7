//! Server side: registration, accept loop, connection handling
//!
//! A server binds its socket, registers `host:port` under the registry root
//! as an ephemeral sequential node, and serves until a `stop` request raises
//! the shared [`ServerLifecycle`] flag.

pub mod acceptor;
pub mod handler;
pub mod lifecycle;
pub mod pool;
pub mod registrar;

pub use acceptor::SocketServer;
pub use handler::{HttpEchoHandler, RequestHandler};
pub use lifecycle::ServerLifecycle;
pub use pool::{Job, ShutdownOutcome, WorkerPool};
pub use registrar::{Registrar, NODE_PREFIX};
