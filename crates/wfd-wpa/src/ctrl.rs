use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    os::unix::net::UnixDatagram,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, unix::SourceFd};
use rand::{Rng, distr::Alphanumeric};
use tracing::{debug, warn};
use wfd_utils::Budget;

use crate::WpaError;

const REQ: Token = Token(0);
const EV: Token = Token(1);
const TIMER: Token = Token(2);

/// Datagram ceiling on the control protocol; replies and events fit in one.
const REQ_REPLY_MAX: usize = 512;
/// Liveness probe period.
const PING_INTERVAL: Duration = Duration::from_secs(10);
/// Hard cap on any single request budget.
const REQUEST_MAX: Duration = Duration::from_secs(1);

/// Prefix for the local datagram socket names the supplicant replies to.
const CTRL_PATH_TEMPLATE: &str = "/tmp/wfd-wpa-ctrl";

/// What an event handler wants to happen to the channel; returning
/// [`Flow::Close`] closes it and surfaces broken-pipe from `dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

enum Readiness {
    Ready,
    TimedOut,
    Retry,
}

/// Control connection to a running supplicant.
///
/// Two UNIX datagram sockets speak the ASCII control protocol: requests and
/// their replies on one, unsolicited event messages (prefixed `<`) on the
/// other, which is subscribed via `ATTACH`. A monotonic timer issues a
/// `PING` every ten seconds; a missing `PONG\n` surfaces as a timeout.
///
/// All three fds live on a private poll instance whose fd can be nested
/// into an outer event loop via [`pollable_fd`](Self::pollable_fd).
pub struct WpaCtrl {
    poll: Poll,
    events: Events,
    tfd: OwnedFd,
    req: Option<BoundSocket>,
    ev: Option<BoundSocket>,
}

impl WpaCtrl {
    pub fn new() -> Result<Self, WpaError> {
        let poll = Poll::new()?;
        let tfd = unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC | libc::TFD_NONBLOCK)
        };
        if tfd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let tfd = unsafe { OwnedFd::from_raw_fd(tfd) };
        poll.registry().register(
            &mut SourceFd(&tfd.as_raw_fd()),
            TIMER,
            Interest::READABLE,
        )?;

        Ok(Self { poll, events: Events::with_capacity(4), tfd, req: None, ev: None })
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.ev.is_some()
    }

    /// The fd to watch (readable) in an outer event loop.
    pub fn pollable_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }

    /// Connect both sockets to the supplicant socket at `ctrl_path` and
    /// subscribe the event socket.
    ///
    /// `@abstract:<name>` selects a Linux abstract address instead of a
    /// filesystem path.
    pub fn open(&mut self, ctrl_path: &Path) -> Result<(), WpaError> {
        if self.is_open() {
            return Err(WpaError::AlreadyOpen);
        }

        self.arm_timer(PING_INTERVAL)?;

        let req = match self.open_socket(ctrl_path, REQ) {
            Ok(s) => s,
            Err(err) => {
                self.disarm_timer();
                return Err(err);
            }
        };
        let ev = match self.open_socket(ctrl_path, EV) {
            Ok(s) => s,
            Err(err) => {
                self.close_socket(req);
                self.disarm_timer();
                return Err(err);
            }
        };

        // subscribe the event socket; nothing but "OK\n" will do
        let attach = raw_request(
            ev.sock.as_raw_fd(),
            b"ATTACH",
            &Budget::new(REQUEST_MAX),
        )
        .and_then(|reply| {
            if reply == b"OK\n" { Ok(()) } else { Err(WpaError::Rejected(reply)) }
        });
        if let Err(err) = attach {
            let _ = raw_request(ev.sock.as_raw_fd(), b"DETACH", &Budget::new(Duration::ZERO));
            self.close_socket(ev);
            self.close_socket(req);
            self.disarm_timer();
            return Err(err);
        }

        debug!(path = %ctrl_path.display(), "wpa: control channel attached");
        self.req = Some(req);
        self.ev = Some(ev);
        Ok(())
    }

    /// Detach and drop both sockets. Safe to call on a closed channel.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }

        // fire-and-forget: send DETACH if possible, never wait for a reply
        if let Some(ev) = &self.ev {
            let _ = raw_request(ev.sock.as_raw_fd(), b"DETACH", &Budget::new(Duration::ZERO));
        }
        if let Some(ev) = self.ev.take() {
            self.close_socket(ev);
        }
        if let Some(req) = self.req.take() {
            self.close_socket(req);
        }
        self.disarm_timer();
        debug!("wpa: control channel closed");
    }

    /// Issue `cmd` and return the raw reply.
    ///
    /// The budget is clamped to one second and shared between the send and
    /// the receive; event messages leaking onto the request socket are
    /// skipped.
    pub fn request(&mut self, cmd: &str, timeout: Duration) -> Result<Vec<u8>, WpaError> {
        let req = self.req.as_ref().ok_or(WpaError::NotOpen)?;
        let budget = Budget::new(timeout.min(REQUEST_MAX));
        raw_request(req.sock.as_raw_fd(), cmd.as_bytes(), &budget)
    }

    /// Issue `cmd` and require the `OK\n` acknowledgement.
    pub fn request_ok(&mut self, cmd: &str, timeout: Duration) -> Result<(), WpaError> {
        let reply = self.request(cmd, timeout)?;
        if reply == b"OK\n" { Ok(()) } else { Err(WpaError::Rejected(reply)) }
    }

    /// Wait up to `timeout` for readiness and service all three fds.
    ///
    /// `handler` receives every event datagram (they start with `<`); the
    /// request socket is drained silently; a timer tick probes liveness
    /// with `PING` and surfaces [`WpaError::Timeout`] when the supplicant
    /// stops answering.
    pub fn dispatch<F>(
        &mut self,
        timeout: Option<Duration>,
        handler: &mut F,
    ) -> Result<(), WpaError>
    where
        F: FnMut(&[u8]) -> Flow,
    {
        if !self.is_open() {
            return Err(WpaError::NotOpen);
        }

        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err.into());
        }

        let (mut ev_read, mut ev_hup) = (false, false);
        let (mut req_read, mut req_hup) = (false, false);
        let (mut t_read, mut t_hup) = (false, false);
        for e in self.events.iter() {
            let hup = e.is_error() || e.is_read_closed();
            match e.token() {
                EV => {
                    ev_read |= e.is_readable();
                    ev_hup |= hup;
                }
                REQ => {
                    req_read |= e.is_readable();
                    req_hup |= hup;
                }
                TIMER => {
                    t_read |= e.is_readable();
                    t_hup |= hup;
                }
                _ => {}
            }
        }

        // drain input before acting on HUP
        if ev_read {
            match self.read_ev(handler) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => {
                    self.close();
                    return Err(WpaError::BrokenPipe);
                }
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            }
        }
        if req_read {
            if let Err(err) = self.drain_req() {
                self.close();
                return Err(err);
            }
        }
        if ev_hup || req_hup {
            self.close();
            return Err(WpaError::BrokenPipe);
        }

        if t_hup {
            // a broken timer is not fatal; the channel merely loses its
            // liveness probe
            warn!("wpa: liveness timer failed, removing it");
            let _ = self
                .poll
                .registry()
                .deregister(&mut SourceFd(&self.tfd.as_raw_fd()));
        } else if t_read {
            self.read_timer()?;
        }

        Ok(())
    }

    fn read_ev<F>(&mut self, handler: &mut F) -> Result<Flow, WpaError>
    where
        F: FnMut(&[u8]) -> Flow,
    {
        let sock = &self.ev.as_ref().expect("open channel has an event socket").sock;
        let mut buf = [0u8; REQ_REPLY_MAX];
        loop {
            match sock.recv(&mut buf) {
                Ok(0) => return Ok(Flow::Continue),
                Ok(n) => {
                    // only event messages belong on this socket
                    if buf[0] == b'<' && handler(&buf[..n]) == Flow::Close {
                        return Ok(Flow::Close);
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock ||
                        e.kind() == io::ErrorKind::Interrupted =>
                {
                    return Ok(Flow::Continue);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Drop spurious datagrams from the request socket; replies are read
    /// synchronously by `request` and anything else is noise.
    fn drain_req(&mut self) -> Result<(), WpaError> {
        let sock = &self.req.as_ref().expect("open channel has a request socket").sock;
        let mut buf = [0u8; REQ_REPLY_MAX];
        loop {
            match sock.recv(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock ||
                        e.kind() == io::ErrorKind::Interrupted =>
                {
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Consume timer expirations; each one costs the supplicant a PING.
    fn read_timer(&mut self) -> Result<(), WpaError> {
        let mut expirations = [0u8; 8];
        let l = unsafe {
            libc::read(self.tfd.as_raw_fd(), expirations.as_mut_ptr().cast(), 8)
        };
        if l < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                return Ok(());
            }
            return Err(err.into());
        }
        if l != 8 {
            return Ok(());
        }

        let req = self.req.as_ref().ok_or(WpaError::NotOpen)?;
        let reply =
            raw_request(req.sock.as_raw_fd(), b"PING", &Budget::new(REQUEST_MAX))?;
        if reply != b"PONG\n" {
            warn!("wpa: supplicant missed its liveness probe");
            return Err(WpaError::Timeout);
        }
        Ok(())
    }

    fn open_socket(&mut self, ctrl_path: &Path, token: Token) -> Result<BoundSocket, WpaError> {
        let bound = BoundSocket::bind_unique()?;
        connect_supplicant(&bound.sock, ctrl_path)?;
        bound.sock.set_nonblocking(true)?;
        self.poll.registry().register(
            &mut SourceFd(&bound.sock.as_raw_fd()),
            token,
            Interest::READABLE,
        )?;
        Ok(bound)
    }

    fn close_socket(&mut self, bound: BoundSocket) {
        let _ = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&bound.sock.as_raw_fd()));
        // dropping `bound` unlinks the bound path
    }

    fn arm_timer(&self, interval: Duration) -> Result<(), WpaError> {
        let ts = libc::timespec {
            tv_sec: interval.as_secs() as libc::time_t,
            tv_nsec: i64::from(interval.subsec_nanos()) as libc::c_long,
        };
        let spec = libc::itimerspec { it_interval: ts, it_value: ts };
        let r = unsafe { libc::timerfd_settime(self.tfd.as_raw_fd(), 0, &spec, std::ptr::null_mut()) };
        if r < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn disarm_timer(&self) {
        if self.arm_timer(Duration::ZERO).is_err() {
            warn!("wpa: cannot disarm liveness timer");
        }
    }
}

impl Drop for WpaCtrl {
    fn drop(&mut self) {
        self.close();
    }
}

/// A datagram socket bound to a unique local pathname, unlinked on drop.
struct BoundSocket {
    sock: UnixDatagram,
    path: PathBuf,
}

impl BoundSocket {
    /// The supplicant insists on replying to a bound peer, so every socket
    /// gets a `(pid, counter, random)` pathname under /tmp. One retry on a
    /// name collision.
    fn bind_unique() -> Result<Self, WpaError> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let mut last = None;
        for _ in 0..2 {
            let suffix: String = rand::rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(char::from)
                .collect();
            let path = PathBuf::from(format!(
                "{}-{}-{}-{}",
                CTRL_PATH_TEMPLATE,
                std::process::id(),
                COUNTER.fetch_add(1, Ordering::Relaxed),
                suffix
            ));
            match UnixDatagram::bind(&path) {
                Ok(sock) => return Ok(Self { sock, path }),
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                    let _ = std::fs::remove_file(&path);
                    last = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(last.expect("bind retry loop ran").into())
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn connect_supplicant(sock: &UnixDatagram, ctrl_path: &Path) -> Result<(), WpaError> {
    let path = ctrl_path.to_string_lossy();
    if let Some(name) = path.strip_prefix("@abstract:") {
        use std::os::linux::net::SocketAddrExt;
        let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
        sock.connect_addr(&addr)?;
    } else {
        sock.connect(ctrl_path)?;
    }
    Ok(())
}

/// Bounded-time datagram request/reply against a raw fd.
fn raw_request(fd: RawFd, cmd: &[u8], budget: &Budget) -> Result<Vec<u8>, WpaError> {
    timed_send(fd, cmd, budget)?;
    timed_recv(fd, budget)
}

fn timed_send(fd: RawFd, cmd: &[u8], budget: &Budget) -> Result<(), WpaError> {
    loop {
        match wait_fd(fd, libc::POLLOUT, budget.remaining_ms())? {
            Readiness::TimedOut => return Err(WpaError::Timeout),
            Readiness::Retry => {}
            Readiness::Ready => {
                let l = unsafe {
                    libc::send(fd, cmd.as_ptr().cast(), cmd.len(), libc::MSG_NOSIGNAL)
                };
                if l < 0 {
                    let err = io::Error::last_os_error();
                    if !matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) {
                        return Err(err.into());
                    }
                } else {
                    // datagrams are atomic; a short send is unrecoverable
                    // anyway, so treat it as sent and await the reply
                    return Ok(());
                }
            }
        }
        if budget.expired() {
            return Err(WpaError::Timeout);
        }
    }
}

fn timed_recv(fd: RawFd, budget: &Budget) -> Result<Vec<u8>, WpaError> {
    let mut buf = [0u8; REQ_REPLY_MAX];
    loop {
        match wait_fd(fd, libc::POLLIN, budget.remaining_ms())? {
            Readiness::TimedOut => return Err(WpaError::Timeout),
            Readiness::Retry => {}
            Readiness::Ready => {
                let l = unsafe {
                    libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), libc::MSG_DONTWAIT)
                };
                if l < 0 {
                    let err = io::Error::last_os_error();
                    if !matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) {
                        return Err(err.into());
                    }
                } else if l > 0 && buf[0] != b'<' {
                    // event messages may leak onto this socket; they belong
                    // to the event channel, skip them
                    return Ok(buf[..l as usize].to_vec());
                }
            }
        }
        if budget.expired() {
            return Err(WpaError::Timeout);
        }
    }
}

fn wait_fd(fd: RawFd, events: libc::c_short, timeout_ms: i32) -> Result<Readiness, WpaError> {
    let mut fds = libc::pollfd { fd, events, revents: 0 };
    let n = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if n < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(Readiness::Retry),
            _ => Err(err.into()),
        };
    }
    if n == 0 {
        return Ok(Readiness::TimedOut);
    }
    if fds.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
        return Err(WpaError::BrokenPipe);
    }
    Ok(Readiness::Ready)
}
