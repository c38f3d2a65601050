use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGPIPE, SIGQUIT, SIGTERM};

/// Signals the daemon consumes through its signal fd.
pub const DAEMON_SIGNALS: &[libc::c_int] = &[SIGINT, SIGTERM, SIGQUIT, SIGHUP, SIGCHLD, SIGPIPE];

/// One delivered signal, as read from the fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Siginfo {
    pub signo: libc::c_int,
    /// Sending pid; for CHLD this is the exited child.
    pub pid: u32,
}

/// Blocks [`DAEMON_SIGNALS`] process-wide and delivers them through a
/// non-blocking fd suitable for the event loop.
pub struct SignalFd {
    fd: OwnedFd,
}

impl SignalFd {
    pub fn new() -> io::Result<Self> {
        let mut mask: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut mask);
            for &sig in DAEMON_SIGNALS {
                libc::sigaddset(&mut mask, sig);
            }
            if libc::sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()) < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        let fd = unsafe { libc::signalfd(-1, &mask, libc::SFD_CLOEXEC | libc::SFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Next pending signal, `None` once drained.
    pub fn read(&self) -> io::Result<Option<Siginfo>> {
        let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
        let want = std::mem::size_of::<libc::signalfd_siginfo>();
        let l = unsafe {
            libc::read(self.fd(), std::ptr::from_mut(&mut info).cast(), want)
        };
        if l < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                return Ok(None);
            }
            return Err(err);
        }
        if l as usize != want {
            return Ok(None);
        }
        Ok(Some(Siginfo { signo: info.ssi_signo as libc::c_int, pid: info.ssi_pid }))
    }
}
