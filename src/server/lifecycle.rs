//! Server run state
//!
//! One shared `stopping` flag: raised by whichever connection handler sees a
//! stop instruction, polled by the accept loop before every accept. Raising
//! it is terminal for the process. Release on store and Acquire on load make
//! the stop visible to the accept task without any further synchronization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ServerLifecycle {
    stopping: Arc<AtomicBool>,
}

impl ServerLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Raise the stop flag; returns true for the call that raised it
    pub fn request_stop(&self) -> bool {
        let first = !self.stopping.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!("Received signal to stop server");
        }
        first
    }
}
