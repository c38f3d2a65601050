use std::{io::Write, os::fd::AsRawFd, os::unix::net::UnixStream, time::Duration};

use mio::{Interest, Token};
use wfd_p2pd::ep::EventLoop;

#[test]
fn add_modify_remove() {
    let (mut tx, rx) = UnixStream::pair().unwrap();
    rx.set_nonblocking(true).unwrap();

    let mut ep = EventLoop::new().unwrap();
    ep.add(rx.as_raw_fd(), Interest::READABLE, Token(5)).unwrap();

    // nothing pending yet
    let events = ep.wait(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(events.iter().count(), 0);

    tx.write_all(b"x").unwrap();
    let events = ep.wait(Some(Duration::from_millis(500))).unwrap();
    let ev = events.iter().next().expect("readable event");
    assert_eq!(ev.token(), Token(5));
    assert!(ev.is_readable());

    // switch interest to writable; a socket with buffer space fires at once
    ep.modify(rx.as_raw_fd(), Interest::WRITABLE, Token(6)).unwrap();
    let events = ep.wait(Some(Duration::from_millis(500))).unwrap();
    let ev = events.iter().next().expect("writable event");
    assert_eq!(ev.token(), Token(6));
    assert!(ev.is_writable());

    ep.remove(rx.as_raw_fd()).unwrap();
    let events = ep.wait(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(events.iter().count(), 0);
}
