//! Control channel to an external Wi-Fi P2P supplicant.
//!
//! The supplicant exposes a UNIX datagram control socket per interface.
//! [`WpaCtrl`] owns the request/reply and event connections to one such
//! socket, [`parser`] turns unsolicited event lines into typed events, and
//! [`Supplicant`] supervises the supplicant child process itself, from
//! fork/exec through the startup race to termination.

mod ctrl;
mod parser;
mod supervisor;

pub use ctrl::{Flow, WpaCtrl};
pub use parser::{EventId, Payload, Priority, WpaEvent, MAC_STRLEN};
pub use supervisor::{Supplicant, SupplicantConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WpaError {
    #[error("control channel already open")]
    AlreadyOpen,
    #[error("control channel not open")]
    NotOpen,
    #[error("supplicant hung up")]
    BrokenPipe,
    #[error("request timed out")]
    Timeout,
    #[error("supplicant rejected request: {0:?}")]
    Rejected(Vec<u8>),
    #[error("supplicant died during startup")]
    ChildDied,
    #[error("malformed event payload: {0}")]
    InvalidEvent(&'static str),
    #[error("wifi-display is unsupported by this supplicant")]
    Unsupported,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
