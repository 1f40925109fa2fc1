use std::cell::RefCell;
use std::net::{Ipv6Addr, UdpSocket};
use std::rc::Rc;
use std::time::{Duration, Instant};

use otbr_agent_rs::udp_proxy::{UdpForwarder, UdpProxy};
use otbr_agent_rs::MainloopManager;

const TEST_THREAD_BA_PORT: u16 = 49191;
const HELLO: &[u8] = b"Hello UdpProxy!";

#[derive(Default)]
struct ForwardRecorder {
    forwarded: bool,
    payload: Vec<u8>,
    remote_port: u16,
    local_port: u16,
}

impl UdpForwarder for ForwardRecorder {
    fn udp_forward(&mut self, payload: &[u8], _remote_addr: Ipv6Addr, remote_port: u16, proxy: &UdpProxy) {
        self.forwarded = true;
        self.payload = payload.to_vec();
        self.remote_port = remote_port;
        self.local_port = proxy.thread_port();
    }
}

fn process_until(manager: &mut MainloopManager, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() && Instant::now() < deadline {
        manager.poll(Duration::from_millis(20)).unwrap();
    }
}

#[test]
fn test_udp_proxy_forwards_incoming_datagrams() {
    let _ = env_logger::builder().is_test(true).try_init();

    let recorder = Rc::new(RefCell::new(ForwardRecorder::default()));
    let proxy = Rc::new(RefCell::new(UdpProxy::new(recorder.clone())));
    let mut manager = MainloopManager::new();
    manager.add_processor(proxy.clone());

    proxy.borrow_mut().start(TEST_THREAD_BA_PORT);
    let host_port = proxy.borrow().host_port();
    assert_ne!(host_port, 0);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(HELLO, ("127.0.0.1", host_port))
        .expect("Failed to send UDP packet through loopback interface");

    process_until(&mut manager, Duration::from_millis(500), || {
        recorder.borrow().forwarded
    });

    let recorder = recorder.borrow();
    assert!(recorder.forwarded);
    assert_eq!(recorder.payload, HELLO);
    assert_eq!(recorder.payload.len(), 15);
    assert_eq!(recorder.local_port, TEST_THREAD_BA_PORT);
    assert_eq!(
        recorder.remote_port,
        sender.local_addr().unwrap().port()
    );

    proxy.borrow_mut().stop();
}

#[test]
fn test_udp_proxy_sends_to_peer() {
    let recorder = Rc::new(RefCell::new(ForwardRecorder::default()));
    let proxy = Rc::new(RefCell::new(UdpProxy::new(recorder)));

    proxy.borrow_mut().start(TEST_THREAD_BA_PORT);

    let listener = UdpSocket::bind("127.0.0.1:12345").unwrap();
    listener
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let peer: Ipv6Addr = "::ffff:127.0.0.1".parse().unwrap();
    proxy.borrow().send_to_peer(HELLO, peer, 12345);

    let mut buffer = [0u8; 1280];
    let (length, _) = listener.recv_from(&mut buffer).expect("No datagram received");
    assert_eq!(&buffer[..length], HELLO);

    proxy.borrow_mut().stop();
}

#[test]
fn test_stop_clears_ports_and_socket() {
    let recorder = Rc::new(RefCell::new(ForwardRecorder::default()));
    let proxy = Rc::new(RefCell::new(UdpProxy::new(recorder)));

    proxy.borrow_mut().start(TEST_THREAD_BA_PORT);
    assert!(proxy.borrow().is_started());

    proxy.borrow_mut().stop();
    let proxy = proxy.borrow();
    assert!(!proxy.is_started());
    assert_eq!(proxy.host_port(), 0);
    assert_eq!(proxy.thread_port(), 0);

    // A stopped proxy silently discards sends.
    proxy.send_to_peer(HELLO, Ipv6Addr::LOCALHOST, 12345);
}

#[test]
fn test_start_is_idempotent() {
    let recorder = Rc::new(RefCell::new(ForwardRecorder::default()));
    let proxy = Rc::new(RefCell::new(UdpProxy::new(recorder)));

    proxy.borrow_mut().start(TEST_THREAD_BA_PORT);
    let first_port = proxy.borrow().host_port();
    proxy.borrow_mut().start(TEST_THREAD_BA_PORT + 1);
    assert_eq!(proxy.borrow().host_port(), first_port);
    assert_eq!(proxy.borrow().thread_port(), TEST_THREAD_BA_PORT);

    proxy.borrow_mut().stop();
}
