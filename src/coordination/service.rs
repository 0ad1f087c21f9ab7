//! Networked coordination service
//!
//! Serves a [`Namespace`] over TCP. Each accepted connection is one session:
//! its requests run against a [`MemorySession`], its watch notifications are
//! forwarded as event frames, and EOF (or any read error) closes the session
//! and expires the session's ephemeral nodes.

use crate::common::{Error, Result};
use crate::coordination::namespace::{MemorySession, Namespace};
use crate::coordination::protocol::{encode_line, ErrorReply, Op, Reply, RequestFrame, ServerFrame};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub struct CoordService {
    listener: TcpListener,
    namespace: Arc<Namespace>,
}

impl CoordService {
    /// Bind the service on `addr` with a fresh namespace
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with(addr, Namespace::new()).await
    }

    /// Bind the service on `addr`, serving an existing namespace
    pub async fn bind_with(addr: SocketAddr, namespace: Arc<Namespace>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            namespace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn namespace(&self) -> Arc<Namespace> {
        Arc::clone(&self.namespace)
    }

    /// Accept sessions until the task is dropped
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Coordination service listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            };

            let namespace = Arc::clone(&self.namespace);
            tokio::spawn(async move {
                if let Err(e) = serve_session(stream, namespace).await {
                    tracing::debug!("Session from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn serve_session(stream: TcpStream, namespace: Arc<Namespace>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (read_half, mut write_half) = stream.into_split();
    let (session, mut events) = namespace.connect()?;
    tracing::info!("Session {} opened from {}", session.id(), peer);

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let line = match encode_line(&frame) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if write_half.write_all(&line).await.is_err() {
                break;
            }
        }
    });

    let event_tx = frames_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if event_tx.send(ServerFrame::Event { event }).is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(Error::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: RequestFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => break Err(Error::Protocol(format!("bad request frame: {}", e))),
        };
        let reply = execute(&session, frame.op);
        if frames_tx
            .send(ServerFrame::Reply {
                id: frame.id,
                reply,
            })
            .is_err()
        {
            break Ok(());
        }
    };

    let id = session.id();
    // closing the session expires ephemerals and drops the event sender
    drop(session);
    let _ = forwarder.await;
    drop(frames_tx);
    let _ = writer.await;
    tracing::info!("Session {} from {} closed", id, peer);

    result
}

fn execute(session: &MemorySession, op: Op) -> Reply {
    let result = match op {
        Op::Ping => Ok(Reply::Pong),
        Op::ListChildren { path, watch } => {
            session.list_children_now(&path, watch).map(Reply::Children)
        }
        Op::GetData { path, watch } => session
            .get_data_now(&path, watch)
            .map(|data| Reply::Data(data.to_vec())),
        Op::Create { path, data, mode } => session
            .create_node_now(&path, Bytes::from(data), mode)
            .map(Reply::Created),
        Op::SetData { path, data } => session
            .set_data_now(&path, Bytes::from(data))
            .map(|_| Reply::Done),
        Op::Exists { path } => session.exists_now(&path).map(Reply::Exists),
    };

    result.unwrap_or_else(|e| Reply::Error(ErrorReply::from(&e)))
}
