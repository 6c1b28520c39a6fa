//! Error types surfaced at the link boundary.

use std::io;

use thiserror::Error;

use crate::frame::FrameError;
use crate::registry::{LinkId, LinkMode};

/// Failure of the underlying byte channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel disconnected")]
    Disconnected,
    #[error("channel i/o error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Errors returned by link and registry operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("link is closed")]
    Closed,
    #[error("operation not permitted on a {0:?} link")]
    PermissionDenied(LinkMode),
    #[error("no free device available")]
    NoDevice,
    #[error("device {0:?} is in use")]
    DeviceBusy(String),
    #[error("device {0:?} is already registered")]
    DuplicateDevice(String),
    #[error("unknown device {0:?}")]
    UnknownDevice(String),
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to spawn link worker: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
