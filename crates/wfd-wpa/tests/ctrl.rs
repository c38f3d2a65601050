use std::{
    os::unix::net::{SocketAddr, UnixDatagram},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use wfd_wpa::{EventId, Flow, Payload, Priority, Supplicant, SupplicantConfig, WpaCtrl, WpaError,
              WpaEvent};

/// Script a supplicant-shaped datagram server: answers ATTACH/PING/
/// TERMINATE, pushes `events` to the attached peer, ignores anything else.
/// Returns the commands it saw.
fn fake_supplicant(path: PathBuf, events: Vec<&'static str>) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let server = UnixDatagram::bind(&path).unwrap();
        server.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

        let reply = |addr: &SocketAddr, data: &[u8]| {
            if let Some(peer) = addr.as_pathname() {
                let _ = server.send_to(data, peer);
            }
        };

        let mut seen = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let Ok((n, addr)) = server.recv_from(&mut buf) else {
                break;
            };
            let cmd = String::from_utf8_lossy(&buf[..n]).into_owned();
            seen.push(cmd.clone());
            match cmd.as_str() {
                "ATTACH" => {
                    reply(&addr, b"OK\n");
                    for ev in &events {
                        reply(&addr, ev.as_bytes());
                    }
                }
                "PING" => reply(&addr, b"PONG\n"),
                "DETACH" => reply(&addr, b"OK\n"),
                "TERMINATE" => {
                    reply(&addr, b"OK\n");
                    break;
                }
                _ => {}
            }
        }
        seen
    })
}

fn drain_events(ctrl: &mut WpaCtrl, want: usize) -> Vec<Vec<u8>> {
    let mut got = Vec::new();
    for _ in 0..40 {
        ctrl.dispatch(Some(Duration::from_millis(50)), &mut |ev: &[u8]| {
            got.push(ev.to_vec());
            Flow::Continue
        })
        .unwrap();
        if got.len() >= want {
            break;
        }
    }
    got
}

#[test]
fn attach_request_events_detach() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wlan0");
    let server = fake_supplicant(
        path.clone(),
        vec![
            "<2>AP-STA-CONNECTED 00:11:22:33:44:55",
            "spurious reply without the event marker",
            "<3>P2P-DEVICE-FOUND 0:0:0:0:0:0 name='display below the tv'",
        ],
    );

    let mut ctrl = WpaCtrl::new().unwrap();
    ctrl.open(&path).unwrap();
    assert!(ctrl.is_open());
    assert!(matches!(ctrl.open(&path), Err(WpaError::AlreadyOpen)));

    ctrl.request_ok("PING", Duration::from_secs(1)).unwrap();

    // only the '<'-prefixed datagrams come through
    let events = drain_events(&mut ctrl, 2);
    assert_eq!(events.len(), 2);

    let ev = WpaEvent::parse(std::str::from_utf8(&events[0]).unwrap()).unwrap();
    assert_eq!(ev.id, EventId::ApStaConnected);
    assert_eq!(ev.priority, Priority::Info);
    assert_eq!(ev.payload, Payload::ApStaConnected { mac: "00:11:22:33:44:55".into() });

    let ev = WpaEvent::parse(std::str::from_utf8(&events[1]).unwrap()).unwrap();
    assert_eq!(
        ev.payload,
        Payload::P2pDeviceFound {
            peer_mac: "0:0:0:0:0:0".into(),
            name: Some("display below the tv".into()),
        }
    );

    ctrl.close();
    assert!(!ctrl.is_open());

    // stop the server
    let probe = UnixDatagram::unbound().unwrap();
    probe.send_to(b"TERMINATE", &path).unwrap();
    let seen = server.join().unwrap();
    assert_eq!(seen.first().map(String::as_str), Some("ATTACH"));
    assert!(seen.iter().any(|c| c == "PING"));
    assert!(seen.iter().any(|c| c == "DETACH"), "close should fire DETACH, saw {seen:?}");
}

#[test]
fn request_times_out_without_reply() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wlan0");
    let server = fake_supplicant(path.clone(), vec![]);

    let mut ctrl = WpaCtrl::new().unwrap();
    ctrl.open(&path).unwrap();

    let err = ctrl.request("GET wifi_display", Duration::from_millis(200)).unwrap_err();
    assert!(matches!(err, WpaError::Timeout));

    ctrl.close();
    let probe = UnixDatagram::unbound().unwrap();
    probe.send_to(b"TERMINATE", &path).unwrap();
    server.join().unwrap();
}

#[test]
fn request_on_closed_channel() {
    let mut ctrl = WpaCtrl::new().unwrap();
    assert!(matches!(ctrl.request("PING", Duration::from_secs(1)), Err(WpaError::NotOpen)));
    assert!(matches!(
        ctrl.dispatch(Some(Duration::ZERO), &mut |_: &[u8]| Flow::Continue),
        Err(WpaError::NotOpen)
    ));
}

fn sleeper_script(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake-supplicant");
    std::fs::write(&path, "#!/bin/sh\nsleep 2\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[test]
fn startup_waits_for_late_socket() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupplicantConfig {
        binary: sleeper_script(dir.path()),
        ctrl_dir: dir.path().to_path_buf(),
        interface: "wlan-test".into(),
    };
    let socket_path = config.ctrl_socket();

    // the "supplicant" socket shows up only after a delay
    let server = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        fake_supplicant(socket_path, vec![]).join().unwrap()
    });

    let mut sup = Supplicant::spawn(config).unwrap();
    assert!(sup.is_alive());

    let mut ctrl = WpaCtrl::new().unwrap();
    sup.wait_and_open(&mut ctrl).unwrap();
    assert!(ctrl.is_open());

    // TERMINATE is acknowledged by the fake server, no SIGTERM needed
    sup.kill(&mut ctrl);
    ctrl.close();
    server.join().unwrap();
}

#[test]
fn startup_detects_dead_child() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupplicantConfig {
        binary: PathBuf::from("/bin/true"),
        ctrl_dir: dir.path().to_path_buf(),
        interface: "wlan-test".into(),
    };

    let mut sup = Supplicant::spawn(config).unwrap();
    let mut ctrl = WpaCtrl::new().unwrap();
    let err = sup.wait_and_open(&mut ctrl).unwrap_err();
    assert!(matches!(err, WpaError::ChildDied));
    assert!(!ctrl.is_open());
}
