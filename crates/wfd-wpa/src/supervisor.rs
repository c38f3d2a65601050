use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Child, Command},
    time::Duration,
};

use tracing::{debug, error, info, warn};
use wfd_utils::Budget;

use crate::{WpaCtrl, WpaError};

/// Cumulative allowance for supplicant startup.
const STARTUP_BUDGET: Duration = Duration::from_secs(10);
/// Poll slice between liveness re-checks during startup.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// How to run the supplicant for one interface.
#[derive(Debug, Clone)]
pub struct SupplicantConfig {
    pub binary: PathBuf,
    pub ctrl_dir: PathBuf,
    pub interface: String,
}

impl SupplicantConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from("wpa_supplicant"),
            ctrl_dir: PathBuf::from("/run/wpa_supplicant"),
            interface: interface.into(),
        }
    }

    /// The per-interface control socket the supplicant will create.
    pub fn ctrl_socket(&self) -> PathBuf {
        self.ctrl_dir.join(&self.interface)
    }
}

/// A supervised supplicant child process.
///
/// Owns the pid: only the supervisor reaps it (non-blocking), and
/// termination goes through the control protocol first, `SIGTERM` second.
pub struct Supplicant {
    child: Child,
    config: SupplicantConfig,
}

impl Supplicant {
    /// Fork and exec the supplicant.
    ///
    /// The child gets a default signal mask and its stdout redirected onto
    /// stderr (the supplicant logs on stdout, the daemon owns stdout).
    pub fn spawn(config: SupplicantConfig) -> Result<Self, WpaError> {
        let mut cmd = Command::new(&config.binary);
        cmd.arg("-Dnl80211")
            .arg("-qq")
            .arg("-C")
            .arg(&config.ctrl_dir)
            .arg("-i")
            .arg(&config.interface);
        unsafe {
            cmd.pre_exec(|| {
                let mut set: libc::sigset_t = std::mem::zeroed();
                libc::sigemptyset(&mut set);
                libc::sigprocmask(libc::SIG_SETMASK, &set, std::ptr::null_mut());
                if libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        info!(pid = child.id(), iface = %config.interface, "wpa: supplicant spawned");
        Ok(Self { child, config })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn config(&self) -> &SupplicantConfig {
        &self.config
    }

    /// Non-blocking child reap; false once the supplicant has exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the supplicant's control socket and open `wpa` on it.
    ///
    /// The inotify watch is created before the existence test so socket
    /// creation cannot race the check. The wait runs in 100 ms slices under
    /// a ten-second budget, verifying between slices that the child is
    /// still alive; "died during startup" and "not ready yet" are different
    /// failures. SIGPIPE is masked during the wait, fatal signals stay
    /// deliverable.
    pub fn wait_and_open(&mut self, wpa: &mut WpaCtrl) -> Result<(), WpaError> {
        let socket_path = self.config.ctrl_socket();
        info!(path = %socket_path.display(), "wpa: waiting for supplicant startup");

        let mut mask: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGPIPE);
        }

        let budget = Budget::new(STARTUP_BUDGET);
        let inotify = Inotify::new()?;
        let dir_watch = inotify.add_watch(
            &self.config.ctrl_dir,
            libc::IN_CREATE | libc::IN_MOVED_TO | libc::IN_ONLYDIR,
        )?;
        self.check_alive()?;

        if !socket_path.exists() {
            loop {
                ppoll_readable(inotify.fd(), budget.slice(POLL_SLICE), &mask)?;
                self.check_alive()?;
                if socket_path.exists() {
                    break;
                }
                inotify.drain();
                if budget.expired() {
                    error!("wpa: timed out waiting for the control socket");
                    return Err(WpaError::Timeout);
                }
            }
        }

        inotify.rm_watch(dir_watch);
        inotify.add_watch(
            &socket_path,
            libc::IN_OPEN | libc::IN_DELETE_SELF | libc::IN_MOVE_SELF,
        )?;
        self.check_alive()?;

        // the path exists but the supplicant may not be serving it yet;
        // retry until someone answers ATTACH
        loop {
            match wpa.open(&socket_path) {
                Ok(()) => return Ok(()),
                Err(err) => debug!(?err, "wpa: control socket not ready"),
            }

            ppoll_readable(inotify.fd(), budget.slice(POLL_SLICE), &mask)?;
            self.check_alive()?;
            inotify.drain();
            if budget.expired() {
                error!("wpa: timed out waiting for the control socket");
                return Err(WpaError::Timeout);
            }
        }
    }

    /// Stop the supplicant: ask nicely over the control channel, fall back
    /// to `SIGTERM` if it neither acknowledges nor exits.
    pub fn kill(&mut self, wpa: &mut WpaCtrl) {
        if wpa.is_open() {
            match wpa.request_ok("TERMINATE", Duration::from_secs(1)) {
                Ok(()) => {
                    info!("wpa: supplicant acknowledged termination");
                    return;
                }
                Err(err) => {
                    if !self.is_alive() {
                        info!("wpa: supplicant already exited");
                        return;
                    }
                    warn!(?err, "wpa: termination request failed");
                }
            }
        }

        info!("wpa: sending SIGTERM to supplicant");
        let r = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
        if r < 0 {
            warn!(err = ?io::Error::last_os_error(), "wpa: cannot signal supplicant");
        }
    }

    fn check_alive(&mut self) -> Result<(), WpaError> {
        if self.is_alive() {
            Ok(())
        } else {
            error!("wpa: supplicant died unexpectedly");
            Err(WpaError::ChildDied)
        }
    }
}

/// Minimal inotify handle for the startup wait.
struct Inotify {
    fd: OwnedFd,
}

impl Inotify {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC | libc::IN_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn add_watch(&self, path: &Path, mask: u32) -> io::Result<i32> {
        let cpath = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let wd = unsafe { libc::inotify_add_watch(self.fd(), cpath.as_ptr(), mask) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(wd)
    }

    fn rm_watch(&self, wd: i32) {
        unsafe { libc::inotify_rm_watch(self.fd(), wd) };
    }

    /// Discard queued events; only the wakeup matters.
    fn drain(&self) {
        let mut buf = [0u8; 4096];
        loop {
            let l = unsafe { libc::read(self.fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if l <= 0 {
                break;
            }
        }
    }
}

/// `ppoll` for readability with the caller's signal mask in effect.
fn ppoll_readable(
    fd: RawFd,
    timeout: Duration,
    mask: &libc::sigset_t,
) -> Result<(), WpaError> {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: i64::from(timeout.subsec_nanos()) as libc::c_long,
    };
    let mut fds = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    let n = unsafe { libc::ppoll(&mut fds, 1, &ts, mask) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
            return Ok(());
        }
        return Err(err.into());
    }
    if n > 0 && fds.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
        return Err(WpaError::BrokenPipe);
    }
    Ok(())
}
