//! Client side of the networked coordination service

use crate::common::{Error, Result};
use crate::coordination::protocol::{encode_line, Op, Reply, RequestFrame, ServerFrame};
use crate::coordination::{Coordination, CreateMode, WatchEvent, WatchEvents};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

type Pending = Arc<DashMap<u64, oneshot::Sender<Reply>>>;

/// A session on a remote [`super::CoordService`].
///
/// The TCP connection is the session; dropping this value closes it, which
/// expires every ephemeral node it created.
pub struct RemoteSession {
    addr: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: Pending,
    /// Raised by the reader before it fails the pending calls
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl RemoteSession {
    /// Connect and complete the session handshake within `timeout`
    pub async fn connect(addr: &str, timeout: Duration) -> Result<(Self, WatchEvents)> {
        tracing::debug!("Connecting to coordination service at {}", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionFailed(format!("{}: connect timed out", addr)))?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::new(DashMap::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_frames(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&closed),
            events_tx,
        ));

        let session = Self {
            addr: addr.to_string(),
            writer: Mutex::new(write_half),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader,
        };

        match tokio::time::timeout(timeout, session.call(Op::Ping)).await {
            Ok(Ok(Reply::Pong)) => {}
            Ok(Ok(other)) => {
                return Err(Error::ConnectionFailed(format!(
                    "{}: unexpected handshake reply {:?}",
                    addr, other
                )))
            }
            Ok(Err(e)) => return Err(Error::ConnectionFailed(format!("{}: {}", addr, e))),
            Err(_) => {
                return Err(Error::ConnectionFailed(format!(
                    "{}: handshake timed out",
                    addr
                )))
            }
        }

        tracing::info!("Coordination session established with {}", addr);
        Ok((session, events_rx))
    }

    async fn call(&self, op: Op) -> Result<Reply> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.session_closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        // the reader may have drained `pending` before our insert
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(self.session_closed());
        }

        let line = encode_line(&RequestFrame { id, op })?;
        let written = {
            let mut writer = self.writer.lock().await;
            writer.write_all(&line).await
        };
        if let Err(e) = written {
            self.pending.remove(&id);
            return Err(Error::Session(format!("{}: {}", self.addr, e)));
        }

        rx.await.map_err(|_| self.session_closed())?.into_result()
    }

    fn session_closed(&self) -> Error {
        Error::Session(format!("{}: session closed", self.addr))
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(
    read_half: OwnedReadHalf,
    pending: Pending,
    closed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<WatchEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Coordination session read failed: {}", e);
                break;
            }
        };

        match serde_json::from_str::<ServerFrame>(&line) {
            Ok(ServerFrame::Reply { id, reply }) => {
                if let Some((_, tx)) = pending.remove(&id) {
                    let _ = tx.send(reply);
                }
            }
            Ok(ServerFrame::Event { event }) => {
                tracing::debug!("Watch fired: {}", event);
                let _ = events.send(event);
            }
            Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
        }
    }

    tracing::info!("Coordination session closed by peer");
    closed.store(true, Ordering::SeqCst);
    // wake every waiting caller with a closed channel
    pending.clear();
}

fn unexpected(reply: Reply) -> Error {
    Error::Protocol(format!("unexpected reply {:?}", reply))
}

impl Coordination for RemoteSession {
    async fn list_children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        let op = Op::ListChildren {
            path: path.to_string(),
            watch,
        };
        match self.call(op).await? {
            Reply::Children(children) => Ok(children),
            other => Err(unexpected(other)),
        }
    }

    async fn get_data(&self, path: &str, watch: bool) -> Result<Bytes> {
        let op = Op::GetData {
            path: path.to_string(),
            watch,
        };
        match self.call(op).await? {
            Reply::Data(data) => Ok(Bytes::from(data)),
            other => Err(unexpected(other)),
        }
    }

    async fn create_node(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<String> {
        let op = Op::Create {
            path: path.to_string(),
            data: data.to_vec(),
            mode,
        };
        match self.call(op).await? {
            Reply::Created(actual) => Ok(actual),
            other => Err(unexpected(other)),
        }
    }

    async fn set_data(&self, path: &str, data: Bytes) -> Result<()> {
        let op = Op::SetData {
            path: path.to_string(),
            data: data.to_vec(),
        };
        match self.call(op).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let op = Op::Exists {
            path: path.to_string(),
        };
        match self.call(op).await? {
            Reply::Exists(found) => Ok(found),
            other => Err(unexpected(other)),
        }
    }
}
