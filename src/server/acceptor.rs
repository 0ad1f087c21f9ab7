//! Accept loop
//!
//! Binds the listening socket, hands each accepted connection to the worker
//! pool, and polls the stop flag between accepts. Accepting is bounded by the
//! poll interval so a raised flag is noticed even when no client connects.
//! On exit the listener is closed first, then the pool is drained.

use crate::common::{Error, Result, ServerConfig};
use crate::server::handler::RequestHandler;
use crate::server::lifecycle::ServerLifecycle;
use crate::server::pool::{ShutdownOutcome, WorkerPool};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct SocketServer<H> {
    listener: TcpListener,
    local_addr: SocketAddr,
    lifecycle: ServerLifecycle,
    handler: Arc<H>,
    pool: WorkerPool,
    poll_interval: Duration,
    grace: Duration,
}

impl<H: RequestHandler> SocketServer<H> {
    /// Bind `addr`; a port of 0 picks a free one
    pub async fn bind(
        addr: SocketAddr,
        config: &ServerConfig,
        lifecycle: ServerLifecycle,
        handler: Arc<H>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            lifecycle,
            handler,
            pool: WorkerPool::new(config.workers),
            poll_interval: config.accept_poll_interval(),
            grace: config.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle(&self) -> &ServerLifecycle {
        &self.lifecycle
    }

    /// Serve until the stop flag is raised, then drain the pool
    pub async fn serve(self) -> Result<ShutdownOutcome> {
        let Self {
            listener,
            local_addr,
            lifecycle,
            handler,
            pool,
            poll_interval,
            grace,
        } = self;

        while !lifecycle.is_stopping() {
            let accepted = match tokio::time::timeout(poll_interval, listener.accept()).await {
                Ok(accepted) => accepted,
                // nothing arrived, go check the flag again
                Err(_) => continue,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            };

            // the flag may have been raised while we were blocked in accept
            if lifecycle.is_stopping() {
                tracing::debug!("Dropping connection from {} during shutdown", peer);
                break;
            }

            tracing::debug!("Accepted connection from {}", peer);
            let handler = Arc::clone(&handler);
            pool.submit(Box::pin(async move {
                if let Err(e) = handler.handle(stream).await {
                    tracing::debug!("Connection from {} failed: {}", peer, e);
                }
            }))?;
        }

        drop(listener);
        tracing::info!("Stopped accepting on {}, waiting for in-flight requests", local_addr);

        let outcome = pool.shutdown(grace).await;
        match outcome {
            ShutdownOutcome::Drained => tracing::info!("Server shut down cleanly"),
            ShutdownOutcome::Forced { cancelled } => {
                tracing::warn!("Server shut down with {} requests cancelled", cancelled)
            }
        }
        Ok(outcome)
    }
}
