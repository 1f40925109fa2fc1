use std::cell::RefCell;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use otbr_agent_rs::dnssd::local::LocalPublisher;
use otbr_agent_rs::dnssd::platform::{DnssdPlatform, PlatformState};
use otbr_agent_rs::dnssd::{
    decode_txt_data, encode_txt_data, DiscoveredHostInfo, DiscoveredInstanceInfo, Publisher,
    State, TxtEntry,
};
use otbr_agent_rs::MainloopManager;

fn process_until(manager: &mut MainloopManager, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() && Instant::now() < deadline {
        manager.poll(Duration::from_millis(20)).unwrap();
    }
}

fn setup() -> (MainloopManager, LocalPublisher) {
    let mut manager = MainloopManager::new();
    let mut publisher = LocalPublisher::new();
    manager.add_processor(Rc::new(RefCell::new(publisher.clone())));
    publisher.start().unwrap();
    (manager, publisher)
}

fn txt_map(data: &[u8]) -> HashMap<String, Option<Vec<u8>>> {
    decode_txt_data(data)
        .unwrap()
        .into_iter()
        .map(|entry| (entry.key, entry.value))
        .collect()
}

#[test]
fn test_subscribe_host_sees_published_addresses() {
    let (mut manager, mut publisher) = setup();

    let host_events: Rc<RefCell<Vec<DiscoveredHostInfo>>> = Rc::new(RefCell::new(Vec::new()));
    let events = host_events.clone();
    publisher.add_subscription_callbacks(
        Box::new(|_, _| {}),
        Box::new(move |_, info| events.borrow_mut().push(info.clone())),
    );

    publisher.subscribe_host("host1");

    let addr1: Ipv6Addr = "2002::1".parse().unwrap();
    let addr2: Ipv6Addr = "2002::2".parse().unwrap();
    publisher.publish_host("host1", &[addr1, addr2], Box::new(|result| result.unwrap()));

    process_until(&mut manager, Duration::from_secs(3), || {
        !host_events.borrow().is_empty()
    });

    {
        let events = host_events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].host_name, "host1.local.");
        assert_eq!(events[0].addresses, vec![addr1, addr2]);
    }

    // Publishing a service on the same host must not fire the host callback
    // again.
    publisher.publish_service(
        "host1",
        "service1",
        "_test._udp",
        &[],
        11111,
        &[],
        Box::new(|result| result.unwrap()),
    );
    process_until(&mut manager, Duration::from_millis(200), || false);
    assert_eq!(host_events.borrow().len(), 1);
}

#[test]
fn test_subscribe_service_type_resolves_instances() {
    let (mut manager, mut publisher) = setup();

    let instance_events: Rc<RefCell<Vec<(String, DiscoveredInstanceInfo)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let events = instance_events.clone();
    publisher.add_subscription_callbacks(
        Box::new(move |service_type, info| {
            events
                .borrow_mut()
                .push((service_type.to_owned(), info.clone()))
        }),
        Box::new(|_, _| {}),
    );

    publisher.subscribe_service("_test._tcp", "");

    let txt1 = encode_txt_data(&[TxtEntry::new("a", b"1"), TxtEntry::new("b", b"2")]).unwrap();
    publisher.publish_service(
        "host1",
        "service1",
        "_test._tcp",
        &["_sub1".to_owned(), "_sub2".to_owned()],
        11111,
        &txt1,
        Box::new(|result| result.unwrap()),
    );
    publisher.publish_service(
        "host1",
        "service2",
        "_test._tcp",
        &[],
        22222,
        &[],
        Box::new(|result| result.unwrap()),
    );

    process_until(&mut manager, Duration::from_secs(3), || {
        instance_events.borrow().len() >= 2
    });

    {
        let events = instance_events.borrow();
        assert_eq!(events.len(), 2);

        let service1 = events
            .iter()
            .find(|(_, info)| info.instance_name == "service1")
            .map(|(_, info)| info.clone())
            .unwrap();
        assert_eq!(service1.host_name, "host1.local.");
        assert_eq!(service1.port, 11111);
        let map = txt_map(&service1.txt_data);
        assert_eq!(map.get("a"), Some(&Some(b"1".to_vec())));
        assert_eq!(map.get("b"), Some(&Some(b"2".to_vec())));

        let service2 = events
            .iter()
            .find(|(_, info)| info.instance_name == "service2")
            .map(|(_, info)| info.clone())
            .unwrap();
        assert_eq!(service2.host_name, "host1.local.");
        assert_eq!(service2.port, 22222);
        assert!(txt_map(&service2.txt_data).is_empty());
    }

    // Removal of an instance is reported with the removed marker, known or
    // not.
    publisher.unpublish_service("service3", "_test._tcp", Box::new(|result| result.unwrap()));
    process_until(&mut manager, Duration::from_secs(3), || {
        instance_events.borrow().len() >= 3
    });

    let events = instance_events.borrow();
    let removed = events
        .iter()
        .find(|(_, info)| info.instance_name == "service3")
        .map(|(_, info)| info.clone())
        .unwrap();
    assert!(removed.removed);
}

#[test]
fn test_resolve_subscription_for_single_instance() {
    let (mut manager, mut publisher) = setup();

    let instance_events: Rc<RefCell<Vec<DiscoveredInstanceInfo>>> = Rc::new(RefCell::new(Vec::new()));
    let events = instance_events.clone();
    publisher.add_subscription_callbacks(
        Box::new(move |_, info| events.borrow_mut().push(info.clone())),
        Box::new(|_, _| {}),
    );

    publisher.publish_service(
        "host1",
        "printer",
        "_ipp._tcp",
        &[],
        631,
        &[],
        Box::new(|result| result.unwrap()),
    );
    process_until(&mut manager, Duration::from_millis(100), || false);
    // No subscription yet, nothing is delivered.
    assert!(instance_events.borrow().is_empty());

    // Subscribing to a specific instance replays the registry entry.
    publisher.subscribe_service("_ipp._tcp", "printer");
    process_until(&mut manager, Duration::from_secs(3), || {
        !instance_events.borrow().is_empty()
    });

    let events = instance_events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].instance_name, "printer");
    assert_eq!(events[0].port, 631);
}

#[test]
fn test_platform_state_tracks_publisher_and_running_flag() {
    let (mut manager, mut publisher) = setup();

    let shared: Rc<RefCell<dyn Publisher>> = Rc::new(RefCell::new(publisher.clone()));
    let platform = Rc::new(RefCell::new(DnssdPlatform::new(shared)));

    let observed: Rc<RefCell<Vec<PlatformState>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = observed.clone();
    platform
        .borrow_mut()
        .set_state_changed_callback(Box::new(move |state| seen.borrow_mut().push(state)));

    let platform_ = platform.clone();
    publisher.add_state_observer(Box::new(move |state| {
        platform_.borrow_mut().handle_publisher_state(state);
    }));

    // The publisher was started before the observer registered; feed the
    // current state the way the agent does at wiring time.
    platform
        .borrow_mut()
        .handle_publisher_state(State::Ready);
    assert_eq!(platform.borrow().state(), PlatformState::Stopped);

    platform.borrow_mut().start();
    assert_eq!(platform.borrow().state(), PlatformState::Ready);

    publisher.stop();
    process_until(&mut manager, Duration::from_secs(1), || {
        platform.borrow().state() == PlatformState::Stopped
    });
    assert_eq!(platform.borrow().state(), PlatformState::Stopped);
    assert_eq!(
        *observed.borrow(),
        vec![PlatformState::Ready, PlatformState::Stopped]
    );
}
