//! Daemon core for the Wi-Fi Display P2P service.
//!
//! A single-threaded, readiness-driven daemon: the [`ep::EventLoop`]
//! multiplexes the supplicant interface ([`P2pInterface`]) and a signal fd
//! ([`signals::SignalFd`]); [`run`] is the dispatch loop that ties them
//! together. Argument parsing and `main` live with the embedding binary,
//! not here.

mod config;
pub mod ep;
mod interface;
pub mod signals;

pub use config::Config;
pub use interface::{ObserverId, P2pInterface};

use signal_hook::consts::{SIGCHLD, SIGPIPE};
use thiserror::Error;
use tracing::info;

use crate::{
    ep::{Disposition, EventLoop},
    signals::SignalFd,
};

/// Event-loop key of the signal fd.
pub const TOKEN_SIGNALS: mio::Token = mio::Token(0);
/// Event-loop key of the supplicant interface.
pub const TOKEN_INTERFACE: mio::Token = mio::Token(1);

#[derive(Error, Debug)]
pub enum P2pdError {
    #[error("event dispatch failed")]
    Dispatch,
    #[error(transparent)]
    Wpa(#[from] wfd_wpa::WpaError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Drive the daemon until a handler asks to quit.
///
/// Signals routed through `signals`: CHLD is demultiplexed to the
/// interface (which quits when its own supplicant is the one that exited),
/// PIPE is swallowed, everything else requests loop exit. All other
/// readiness goes to the interface.
pub fn run(
    ep: &mut EventLoop,
    signals: &SignalFd,
    iface: &mut P2pInterface,
) -> Result<(), P2pdError> {
    loop {
        let mut quit = false;
        for ev in ep.wait(None)?.iter() {
            if ev.token() == TOKEN_SIGNALS {
                while let Some(info) = signals.read()? {
                    match info.signo {
                        SIGCHLD => {
                            if iface.dispatch_chld(&info) == Disposition::Quit {
                                quit = true;
                            }
                        }
                        SIGPIPE => {}
                        signo => {
                            info!(signo, "received termination signal");
                            quit = true;
                        }
                    }
                }
            } else {
                match iface.dispatch(ev) {
                    Disposition::Quit => quit = true,
                    Disposition::Error => return Err(P2pdError::Dispatch),
                    Disposition::Handled | Disposition::NotHandled => {}
                }
            }
        }
        if quit {
            return Ok(());
        }
    }
}
