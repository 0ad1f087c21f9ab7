//! Round-robin request dispatch over the membership view
//!
//! Best-effort load generation: every request counts toward the budget
//! whether or not it lands, nothing is retried, and an empty view ends the
//! run early instead of spinning.

use crate::client::view::RegistryView;
use crate::common::wire::{self, Response, STOP_TOKEN};
use crate::common::{ClientConfig, Error, Result};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Summary of one dispatch run
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Requests counted against the budget
    pub sent: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Requests issued per location
    pub per_target: BTreeMap<String, u64>,
    pub elapsed: Duration,
    /// Run ended because the view was empty
    pub view_exhausted: bool,
}

pub struct Dispatcher {
    view: RegistryView,
    request_timeout: Duration,
    pass_interval: Duration,
}

impl Dispatcher {
    pub fn new(view: RegistryView, config: &ClientConfig) -> Self {
        Self {
            view,
            request_timeout: config.request_timeout(),
            pass_interval: config.pass_interval(),
        }
    }

    pub fn with_timing(
        view: RegistryView,
        request_timeout: Duration,
        pass_interval: Duration,
    ) -> Self {
        Self {
            view,
            request_timeout,
            pass_interval,
        }
    }

    /// Send `budget` requests, round-robin over the view.
    ///
    /// Each pass walks a fresh snapshot of the view in path order, so with a
    /// stable view of `k` servers each one receives `budget / k` requests,
    /// rounded up or down. The view may change between passes.
    pub async fn run(&self, budget: u64) -> DispatchReport {
        let start = Instant::now();
        let mut report = DispatchReport::default();

        while report.sent < budget {
            let snapshot = self.view.snapshot();
            if snapshot.is_empty() {
                tracing::warn!(
                    "No live servers left after {} of {} requests, stopping",
                    report.sent,
                    budget
                );
                report.view_exhausted = true;
                break;
            }

            for (node, location) in snapshot {
                if report.sent >= budget {
                    break;
                }
                let seq = report.sent;
                tracing::debug!("Sending request no. {} to {} at {}", seq, node, location);

                match self.send(seq, &location).await {
                    Ok(response) => {
                        tracing::debug!("Node {} responded: {}", node, response.body);
                        report.succeeded += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Request no. {} to {} failed: {}", seq, node, e);
                        report.failed += 1;
                    }
                }
                report.sent += 1;
                *report.per_target.entry(location).or_default() += 1;
            }

            if report.sent < budget {
                tokio::time::sleep(self.pass_interval).await;
            }
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            "Dispatched {} requests ({} ok, {} failed) in {:?}",
            report.sent,
            report.succeeded,
            report.failed,
            report.elapsed
        );
        report
    }

    async fn send(&self, seq: u64, location: &str) -> Result<Response> {
        exchange(location, &wire::request_payload(seq), self.request_timeout).await
    }
}

/// Ask the server at `location` to stop; returns its acknowledgement
pub async fn send_stop(location: &str, timeout: Duration) -> Result<Response> {
    tracing::info!("Sending stop signal to {}", location);
    exchange(location, STOP_TOKEN, timeout).await
}

/// One short-lived connection: write a request, read the whole response
async fn exchange(location: &str, body: &str, timeout: Duration) -> Result<Response> {
    let attempt = async {
        let mut stream = TcpStream::connect(location)
            .await
            .map_err(|e| Error::dispatch(location, e))?;
        stream
            .write_all(&wire::encode_request(location, body))
            .await
            .map_err(|e| Error::dispatch(location, e))?;

        let mut raw = Vec::new();
        (&mut stream)
            .take(wire::MAX_RESPONSE_BYTES as u64 + 1)
            .read_to_end(&mut raw)
            .await
            .map_err(|e| Error::dispatch(location, e))?;
        if raw.len() > wire::MAX_RESPONSE_BYTES {
            return Err(Error::dispatch(
                location,
                format!("response exceeds {} bytes", wire::MAX_RESPONSE_BYTES),
            ));
        }

        let response = wire::parse_response(&raw).map_err(|e| Error::dispatch(location, e))?;
        if !response.is_success() {
            return Err(Error::dispatch(
                location,
                format!("status {}", response.status),
            ));
        }
        Ok::<_, Error>(response)
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| Error::dispatch(location, format!("timed out after {:?}", timeout)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_view_sends_nothing() {
        let dispatcher = Dispatcher::with_timing(
            RegistryView::new(),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );
        let report = dispatcher.run(5).await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 0);
        assert!(report.view_exhausted);
    }

    #[tokio::test]
    async fn test_zero_budget_is_a_no_op() {
        let view = RegistryView::new();
        view.insert("/chorano/x_0000000000", "127.0.0.1:1");
        let dispatcher =
            Dispatcher::with_timing(view, Duration::from_millis(100), Duration::from_millis(10));
        let report = dispatcher.run(0).await;
        assert_eq!(report.sent, 0);
        assert!(!report.view_exhausted);
    }

    #[tokio::test]
    async fn test_oversized_response_is_a_dispatch_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let flood = vec![b'A'; wire::MAX_RESPONSE_BYTES + 1024];
            let _ = stream.write_all(&flood).await;
            // hold the connection until the client hangs up
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let result = send_stop(&addr, Duration::from_secs(5)).await;
        match result {
            Err(Error::Dispatch { reason, .. }) => assert!(reason.contains("exceeds")),
            other => panic!("expected dispatch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_counts_as_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let view = RegistryView::new();
        view.insert("/chorano/x_0000000000", addr.clone());
        let dispatcher =
            Dispatcher::with_timing(view, Duration::from_millis(500), Duration::from_millis(5));

        let report = dispatcher.run(3).await;
        assert_eq!(report.sent, 3);
        assert_eq!(report.failed, 3);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.per_target.get(&addr), Some(&3));
    }
}
