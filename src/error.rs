//! Error kinds surfaced by the core (spec §7).

use thiserror::Error;

/// Every error the frame transport, correlator, registry and dispatch
/// engine can return. Binaries convert these to `anyhow` at the top level;
/// library code always returns `CoreError` so callers can match on kind.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("operation attempted with no live connection")]
    NotConnected,

    #[error("write queue saturated")]
    Backpressure,

    #[error("incoming frame of {len} bytes exceeds MAX_FRAME ({max})")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("frame payload did not decode as a known wire message")]
    Decode(#[from] bincode::Error),

    #[error("request timed out waiting for a response")]
    Timeout,

    #[error("connection closed while a request was pending")]
    ConnectionLost,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
