use std::io;
use std::path::PathBuf;

use crate::protocol::connection::state::{SessionEvent, SessionState};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to resolve host `{host}`")]
    HostResolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to set up the datagram socket")]
    SocketSetup(#[source] io::Error),

    #[error("firmware image `{}` could not be read", .path.display())]
    FirmwareNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed packet of {len} bytes (header is 9 bytes)")]
    MalformedPacket { len: usize },

    #[error("{phase}: gave up after {attempts} consecutive timeouts")]
    RetriesExhausted { phase: &'static str, attempts: u32 },

    #[error("peer closed the transfer with {missing} segment(s) missing")]
    Incomplete { missing: usize },

    #[error("invalid session transition: {event:?} while {from:?}")]
    InvalidTransition {
        from: SessionState,
        event: SessionEvent,
    },

    #[error("session cancelled")]
    Cancelled,
}
