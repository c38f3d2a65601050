use std::time::Duration;

use mio::{Interest, event::Event};
use tracing::{info, warn};
use wfd_wpa::{Flow, Supplicant, SupplicantConfig, WpaCtrl, WpaError, WpaEvent};

use crate::{
    Config, P2pdError, TOKEN_INTERFACE,
    ep::{Disposition, EventLoop},
    signals::Siginfo,
};

pub type ObserverId = u64;

/// One managed P2P interface: a supervised supplicant, the control channel
/// to it, and the observers its events fan out to.
pub struct P2pInterface {
    wpa: WpaCtrl,
    supplicant: Supplicant,
    observers: Vec<(ObserverId, Box<dyn FnMut(&WpaEvent)>)>,
    next_observer: ObserverId,
}

impl P2pInterface {
    /// Spawn the supplicant, connect the control channel, verify Wi-Fi
    /// Display support and register with the event loop.
    pub fn new(config: &Config, ep: &EventLoop) -> Result<Self, P2pdError> {
        info!(iface = %config.interface, "p2p: bringing up interface");

        let mut supplicant = Supplicant::spawn(SupplicantConfig {
            binary: config.wpa_binary.clone(),
            ctrl_dir: config.wpa_ctrl_dir.clone(),
            interface: config.interface.clone(),
        })?;

        let mut wpa = WpaCtrl::new()?;
        if let Err(err) = supplicant.wait_and_open(&mut wpa) {
            supplicant.kill(&mut wpa);
            return Err(err.into());
        }

        // conservative: anything but an exact "1" means no Wi-Fi Display
        let supported = wpa
            .request("GET wifi_display", Duration::from_secs(1))
            .is_ok_and(|reply| reply.trim_ascii_end() == b"1");
        if !supported {
            warn!("p2p: supplicant has no wifi_display support");
            supplicant.kill(&mut wpa);
            wpa.close();
            return Err(WpaError::Unsupported.into());
        }

        ep.add(wpa.pollable_fd(), Interest::READABLE, TOKEN_INTERFACE)?;
        Ok(Self { wpa, supplicant, observers: Vec::new(), next_observer: 0 })
    }

    /// Add an observer; parsed events are fanned out in registration order.
    pub fn register_event_fn(&mut self, f: impl FnMut(&WpaEvent) + 'static) -> ObserverId {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Box::new(f)));
        id
    }

    pub fn unregister_event_fn(&mut self, id: ObserverId) {
        self.observers.retain(|(i, _)| *i != id);
    }

    /// Service the control channel if this readiness event is ours.
    ///
    /// A malformed event line is logged and skipped; the pipeline keeps
    /// going with the next datagram.
    pub fn dispatch(&mut self, ev: &Event) -> Disposition {
        if ev.token() != TOKEN_INTERFACE {
            return Disposition::NotHandled;
        }

        let Self { wpa, observers, .. } = self;
        let r = wpa.dispatch(Some(Duration::ZERO), &mut |line: &[u8]| {
            let Ok(text) = std::str::from_utf8(line) else {
                warn!("p2p: ignoring non-utf8 event datagram");
                return Flow::Continue;
            };
            match WpaEvent::parse(text) {
                Ok(event) => {
                    for (_, f) in observers.iter_mut() {
                        f(&event);
                    }
                }
                Err(err) => warn!(?err, "p2p: ignoring malformed event"),
            }
            Flow::Continue
        });

        match r {
            Ok(()) => Disposition::Handled,
            Err(err) => {
                warn!(?err, "p2p: control channel failed");
                Disposition::Error
            }
        }
    }

    /// CHLD demux: quit once our supplicant is the child that exited.
    pub fn dispatch_chld(&mut self, info: &Siginfo) -> Disposition {
        if info.pid == 0 || info.pid != self.supplicant.pid() {
            return Disposition::NotHandled;
        }
        info!("p2p: supplicant exited");
        self.wpa.close();
        Disposition::Quit
    }

    /// Orderly teardown: stop the supplicant, then the channel.
    pub fn shutdown(&mut self) {
        self.supplicant.kill(&mut self.wpa);
        self.wpa.close();
    }
}
