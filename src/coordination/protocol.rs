//! Frames exchanged with a [`super::CoordService`]
//!
//! Newline-delimited JSON. Clients send [`RequestFrame`]s tagged with an id;
//! the service answers each with a [`ServerFrame::Reply`] carrying the same
//! id and pushes watch notifications as [`ServerFrame::Event`] at any time.

use crate::common::{Error, Result};
use crate::coordination::{CreateMode, WatchEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Ping,
    ListChildren { path: String, watch: bool },
    GetData { path: String, watch: bool },
    Create { path: String, data: Vec<u8>, mode: CreateMode },
    SetData { path: String, data: Vec<u8> },
    Exists { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply { id: u64, reply: Reply },
    Event { event: WatchEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Pong,
    Children(Vec<String>),
    Data(Vec<u8>),
    Created(String),
    Exists(bool),
    Done,
    Error(ErrorReply),
}

/// Error carried back to a remote caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NodeExists,
    InvalidPath,
    Session,
    Other,
}

impl From<&Error> for ErrorReply {
    fn from(err: &Error) -> Self {
        let (kind, message) = match err {
            Error::NotFound(path) => (ErrorKind::NotFound, path.clone()),
            Error::NodeExists(path) => (ErrorKind::NodeExists, path.clone()),
            Error::InvalidPath(msg) => (ErrorKind::InvalidPath, msg.clone()),
            Error::Session(msg) => (ErrorKind::Session, msg.clone()),
            other => (ErrorKind::Other, other.to_string()),
        };
        Self { kind, message }
    }
}

impl From<ErrorReply> for Error {
    fn from(reply: ErrorReply) -> Self {
        match reply.kind {
            ErrorKind::NotFound => Error::NotFound(reply.message),
            ErrorKind::NodeExists => Error::NodeExists(reply.message),
            ErrorKind::InvalidPath => Error::InvalidPath(reply.message),
            ErrorKind::Session => Error::Session(reply.message),
            ErrorKind::Other => Error::Other(reply.message),
        }
    }
}

/// Serialize a frame as one line (trailing newline included)
pub fn encode_line<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    Ok(line)
}

impl Reply {
    /// Turn an error reply back into an `Err`
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(e) => Err(e.into()),
            other => Ok(other),
        }
    }
}
