use std::{
    fmt,
    io::{self, IoSlice, Read, Write},
    net::SocketAddrV6,
    os::fd::{AsRawFd, FromRawFd, RawFd},
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, net::TcpStream};
use tracing::debug;
use wfd_utils::RingBuffer;

use crate::RtspError;

const STREAM: Token = Token(0);
const RX_BUF_SIZE: usize = 4096;
const RX_ROUNDS: usize = 128;

/// What the receive handler wants to happen to the channel.
///
/// Returning [`Flow::Close`] from inside a callback closes the channel and
/// makes the surrounding `dispatch` surface [`RtspError::BrokenPipe`] so
/// the caller can tear down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Non-blocking RTSP control connection.
///
/// Wraps one IPv6 stream socket and a ring of pending outbound bytes.
/// `open_*` puts the channel into the connecting state; the first readiness
/// on the socket confirms the connection and the handler is invoked once
/// with an empty chunk as the connected notification. After that every
/// received chunk is forwarded as-is (feed them to a [`crate::Decoder`]).
///
/// Writes are queued via [`send`](Self::send) and flushed from
/// [`dispatch`](Self::dispatch); writable interest is armed only while the
/// out-ring is non-empty.
pub struct Control {
    poll: Poll,
    events: Events,
    stream: Option<TcpStream>,
    connected: bool,
    out_ring: RingBuffer,
    /// WRITABLE interest currently registered.
    write_armed: bool,
}

impl Control {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
            stream: None,
            connected: false,
            out_ring: RingBuffer::new(),
            write_armed: false,
        })
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.is_open() && self.connected
    }

    /// Adopt an already established or connecting stream socket.
    pub fn open_fd(&mut self, stream: std::net::TcpStream) -> Result<(), RtspError> {
        if self.is_open() {
            return Err(RtspError::AlreadyOpen);
        }
        stream.set_nonblocking(true)?;
        let mut stream = TcpStream::from_std(stream);
        // readable+writable until connected; first readiness is the
        // "connected" edge
        self.poll.registry().register(
            &mut stream,
            STREAM,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        self.stream = Some(stream);
        self.connected = false;
        self.write_armed = true;
        Ok(())
    }

    /// Create a non-blocking IPv6 socket, optionally bind `src`, and start
    /// connecting to `dst`.
    pub fn open_tcp(
        &mut self,
        src: Option<&SocketAddrV6>,
        dst: &SocketAddrV6,
    ) -> Result<(), RtspError> {
        if self.is_open() {
            return Err(RtspError::AlreadyOpen);
        }

        let fd = unsafe {
            libc::socket(
                libc::AF_INET6,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                0,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // from here the fd is owned; dropping the stream closes it
        let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };

        if let Some(src) = src {
            let sa = sockaddr_in6(src);
            let r = unsafe {
                libc::bind(
                    fd,
                    std::ptr::from_ref(&sa).cast(),
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            };
            if r < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }

        let sa = sockaddr_in6(dst);
        let r = unsafe {
            libc::connect(
                fd,
                std::ptr::from_ref(&sa).cast(),
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        };
        if r < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(err.into());
            }
        }

        self.open_fd(stream)
    }

    /// Shut the socket down and drop all pending output.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("rtsp: closing control channel");
            let _ = self.poll.registry().deregister(&mut stream);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.connected = false;
        self.write_armed = false;
        self.out_ring.flush();
    }

    /// Wait up to `timeout` for readiness and service both directions.
    ///
    /// `handler` receives every inbound chunk; the empty chunk is the
    /// connected notification. Any unrecoverable error closes the channel
    /// before it is returned.
    pub fn dispatch<F>(&mut self, timeout: Option<Duration>, handler: &mut F) -> Result<(), RtspError>
    where
        F: FnMut(&[u8]) -> Flow,
    {
        if !self.is_open() {
            return Err(RtspError::NotOpen);
        }

        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err.into());
        }

        let (mut readable, mut writable, mut hup) = (false, false, false);
        for ev in self.events.iter() {
            if ev.token() != STREAM {
                continue;
            }
            readable |= ev.is_readable();
            writable |= ev.is_writable();
            hup |= ev.is_error() || ev.is_read_closed() || ev.is_write_closed();
        }

        let mut result = Ok(());
        if readable {
            result = self.connect_done(handler).and_then(|()| self.recv_all(handler));
        }
        if result.is_ok() && writable {
            result = self.connect_done(handler).and_then(|()| self.send_all());
        }
        // handle HUP last so pending input is drained first
        if result.is_ok() && hup {
            result = Err(RtspError::BrokenPipe);
        }

        if result.is_err() {
            self.close();
        }
        result
    }

    /// Queue `buf` for transmission; bytes go out from `dispatch`.
    pub fn send(&mut self, buf: &[u8]) -> Result<(), RtspError> {
        if !self.is_open() {
            return Err(RtspError::NotOpen);
        }

        let was_empty = self.out_ring.is_empty();
        self.out_ring.push(buf)?;

        if was_empty && !self.write_armed {
            self.poll.registry().reregister(
                self.stream.as_mut().expect("open channel has a stream"),
                STREAM,
                Interest::READABLE | Interest::WRITABLE,
            )?;
            self.write_armed = true;
        }
        Ok(())
    }

    /// Format directly into the out-ring queue.
    pub fn send_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), RtspError> {
        self.send(fmt::format(args).as_bytes())
    }

    /// The fd to watch (readable) in an outer event loop.
    pub fn pollable_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }

    fn connect_done<F>(&mut self, handler: &mut F) -> Result<(), RtspError>
    where
        F: FnMut(&[u8]) -> Flow,
    {
        if self.connected {
            return Ok(());
        }
        self.connected = true;
        debug!("rtsp: control channel connected");
        if handler(&[]) == Flow::Close {
            return Err(RtspError::BrokenPipe);
        }
        Ok(())
    }

    fn recv_all<F>(&mut self, handler: &mut F) -> Result<(), RtspError>
    where
        F: FnMut(&[u8]) -> Flow,
    {
        let stream = self.stream.as_mut().expect("open channel has a stream");
        let mut buf = [0u8; RX_BUF_SIZE];

        let mut rounds_exhausted = true;
        for _ in 0..RX_ROUNDS {
            match stream.read(&mut buf) {
                // EOF is reported through the read-closed event
                Ok(0) => {
                    rounds_exhausted = false;
                    break;
                }
                Ok(n) => {
                    if handler(&buf[..n]) == Flow::Close {
                        return Err(RtspError::BrokenPipe);
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock ||
                        e.kind() == io::ErrorKind::Interrupted =>
                {
                    rounds_exhausted = false;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        // the poll is edge-triggered: leaving data queued after the round
        // cap needs a fresh edge, which reregistering provides
        if rounds_exhausted {
            let interest = if self.write_armed {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            self.poll.registry().reregister(
                self.stream.as_mut().expect("open channel has a stream"),
                STREAM,
                interest,
            )?;
        }
        Ok(())
    }

    /// Gather-write as much of the out-ring as the kernel takes; disarm
    /// writable interest once fully drained.
    fn send_all(&mut self) -> Result<(), RtspError> {
        let stream = self.stream.as_mut().expect("open channel has a stream");

        let mut drained = true;
        let mut written = 0;
        {
            let (a, b) = self.out_ring.peek();
            let total = a.len() + b.len();
            if total > 0 {
                let iov = [IoSlice::new(a), IoSlice::new(b)];
                let n = if b.is_empty() { 1 } else { 2 };
                match stream.write_vectored(&iov[..n]) {
                    Ok(l) => {
                        written = l;
                        if l < total {
                            drained = false;
                        }
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock ||
                            e.kind() == io::ErrorKind::Interrupted =>
                    {
                        drained = false;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        self.out_ring.pull(written);

        if drained && self.write_armed {
            self.poll.registry().reregister(
                self.stream.as_mut().expect("open channel has a stream"),
                STREAM,
                Interest::READABLE,
            )?;
            self.write_armed = false;
        }
        Ok(())
    }
}

fn sockaddr_in6(addr: &SocketAddrV6) -> libc::sockaddr_in6 {
    let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sa.sin6_port = addr.port().to_be();
    sa.sin6_flowinfo = addr.flowinfo();
    sa.sin6_addr.s6_addr = addr.ip().octets();
    sa.sin6_scope_id = addr.scope_id();
    sa
}
