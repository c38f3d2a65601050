use std::{io, os::fd::RawFd, time::Duration};

use mio::{Events, Interest, Poll, Token, unix::SourceFd};

/// Handler verdict for one readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    NotHandled,
    Quit,
    Error,
}

/// Readiness multiplexer the daemon components hang their fds into.
///
/// Each registration carries a `Token` key identifying its owner; one
/// `wait` returns up to 64 ready descriptors.
pub struct EventLoop {
    poll: Poll,
    events: Events,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(64) })
    }

    pub fn add(&self, fd: RawFd, interest: Interest, token: Token) -> io::Result<()> {
        self.poll.registry().register(&mut SourceFd(&fd), token, interest)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest, token: Token) -> io::Result<()> {
        self.poll.registry().reregister(&mut SourceFd(&fd), token, interest)
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    /// Block until readiness or `timeout`; an interrupted wait is empty,
    /// not an error.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<&Events> {
        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
            self.events.clear();
        }
        Ok(&self.events)
    }
}
