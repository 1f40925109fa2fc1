//! In-process DNS-SD publisher.
//!
//! Keeps the registry and subscription fan-out of a real mDNS daemon without
//! touching the network: registrations are answered from the local tables and
//! discovery callbacks fire for matching subscriptions. This backend serves
//! dry-run operation and the test suite; Avahi/mDNSResponder bindings plug in
//! behind the same [`Publisher`] trait.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv6Addr;
use std::rc::Rc;

use log::{debug, info};
use multimap::MultiMap;

use crate::dnssd::{
    fully_qualified, DiscoveredHostInfo, DiscoveredInstanceInfo, HostCallback, InstanceCallback,
    Publisher, ResultCallback, State, StateObserver, SubscriberId, DEFAULT_TTL,
};
use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::{MainloopContext, MainloopProcessor};

#[derive(Clone, PartialEq, Eq, Hash)]
struct ServiceKey {
    service_type: String,
    instance_name: String,
}

#[derive(Clone)]
struct ServiceRecord {
    host_name: String,
    sub_types: Vec<String>,
    port: u16,
    txt_data: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq)]
struct ServiceSubscription {
    service_type: String,
    // Empty for a browse on the whole type.
    instance_name: String,
}

enum Notification {
    RequestDone(ResultCallback, Result<()>),
    Instance(String, DiscoveredInstanceInfo),
    Host(String, DiscoveredHostInfo),
    StateChanged(State),
}

struct PublisherInner {
    state: State,
    netif_index: u32,
    services: HashMap<ServiceKey, ServiceRecord>,
    // main index is `services`; maps type to its instance names
    instances_by_type: MultiMap<String, String>,
    hosts: HashMap<String, Vec<Ipv6Addr>>,
    keys: HashMap<String, Vec<u8>>,
    service_subscriptions: Vec<ServiceSubscription>,
    host_subscriptions: Vec<String>,
    subscribers: Vec<(SubscriberId, InstanceCallback, HostCallback)>,
    next_subscriber_id: SubscriberId,
    state_observers: Vec<StateObserver>,
    pending: VecDeque<Notification>,
}

impl PublisherInner {
    fn new() -> Self {
        PublisherInner {
            state: State::Idle,
            netif_index: 0,
            services: HashMap::new(),
            instances_by_type: MultiMap::new(),
            hosts: HashMap::new(),
            keys: HashMap::new(),
            service_subscriptions: Vec::new(),
            host_subscriptions: Vec::new(),
            subscribers: Vec::new(),
            next_subscriber_id: 0,
            state_observers: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    fn instance_info(&self, key: &ServiceKey, record: &ServiceRecord) -> DiscoveredInstanceInfo {
        let addresses = self
            .hosts
            .get(&record.host_name)
            .cloned()
            .unwrap_or_default();

        DiscoveredInstanceInfo {
            removed: false,
            netif_index: self.netif_index,
            instance_name: key.instance_name.clone(),
            host_name: fully_qualified(&record.host_name),
            port: record.port,
            priority: 0,
            weight: 0,
            addresses,
            txt_data: record.txt_data.clone(),
            ttl: DEFAULT_TTL,
        }
    }

    // A subscription matches on the base type or on any sub-type browse of
    // the form `<label>._sub.<type>`.
    fn has_service_subscription(
        &self,
        service_type: &str,
        instance_name: &str,
        sub_types: &[String],
    ) -> bool {
        self.service_subscriptions.iter().any(|sub| {
            let type_matches = sub.service_type == service_type
                || sub_types
                    .iter()
                    .any(|label| sub.service_type == format!("{label}._sub.{service_type}"));
            type_matches && (sub.instance_name.is_empty() || sub.instance_name == instance_name)
        })
    }

    fn notify_service(&mut self, key: &ServiceKey) {
        if let Some(record) = self.services.get(key) {
            if !self.has_service_subscription(&key.service_type, &key.instance_name, &record.sub_types)
            {
                return;
            }
            let info = self.instance_info(key, record);
            self.pending
                .push_back(Notification::Instance(key.service_type.clone(), info));
        }
    }

    fn notify_service_removed(&mut self, key: &ServiceKey) {
        if !self.has_service_subscription(&key.service_type, &key.instance_name, &[]) {
            return;
        }
        let info = DiscoveredInstanceInfo {
            removed: true,
            netif_index: self.netif_index,
            instance_name: key.instance_name.clone(),
            ..DiscoveredInstanceInfo::default()
        };
        self.pending
            .push_back(Notification::Instance(key.service_type.clone(), info));
    }

    fn notify_host(&mut self, host_name: &str) {
        if !self.host_subscriptions.iter().any(|h| h == host_name) {
            return;
        }
        if let Some(addresses) = self.hosts.get(host_name) {
            let info = DiscoveredHostInfo {
                host_name: fully_qualified(host_name),
                addresses: addresses.clone(),
                ttl: DEFAULT_TTL,
            };
            self.pending
                .push_back(Notification::Host(host_name.to_owned(), info));
        }
    }

    fn complete(&mut self, callback: ResultCallback, result: Result<()>) {
        self.pending
            .push_back(Notification::RequestDone(callback, result));
    }

    fn check_started(&self) -> Result<()> {
        if self.state == State::Ready {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::InvalidState, "mDNS publisher is not ready"))
        }
    }
}

/// Cloneable handle to the in-process publisher.
///
/// One clone is registered with the mainloop; further clones are held by the
/// DNS-SD platform, the advertising proxy and the border agent.
#[derive(Clone)]
pub struct LocalPublisher {
    inner: Rc<RefCell<PublisherInner>>,
}

impl Default for LocalPublisher {
    fn default() -> Self {
        LocalPublisher::new()
    }
}

impl LocalPublisher {
    pub fn new() -> Self {
        LocalPublisher {
            inner: Rc::new(RefCell::new(PublisherInner::new())),
        }
    }

    pub fn set_netif_index(&self, netif_index: u32) {
        self.inner.borrow_mut().netif_index = netif_index;
    }

    /// True when discovery callbacks or request completions are waiting for
    /// the next mainloop pass.
    pub fn has_pending_notifications(&self) -> bool {
        !self.inner.borrow().pending.is_empty()
    }

    fn deliver(&self, notification: Notification) {
        match notification {
            Notification::RequestDone(callback, result) => callback(result),
            Notification::Instance(service_type, info) => {
                let mut subscribers =
                    std::mem::take(&mut self.inner.borrow_mut().subscribers);
                for (_, instance_callback, _) in subscribers.iter_mut() {
                    instance_callback(&service_type, &info);
                }
                self.restore_subscribers(subscribers);
            }
            Notification::Host(host_name, info) => {
                let mut subscribers =
                    std::mem::take(&mut self.inner.borrow_mut().subscribers);
                for (_, _, host_callback) in subscribers.iter_mut() {
                    host_callback(&host_name, &info);
                }
                self.restore_subscribers(subscribers);
            }
            Notification::StateChanged(state) => {
                let mut observers = std::mem::take(&mut self.inner.borrow_mut().state_observers);
                for observer in observers.iter_mut() {
                    observer(state);
                }
                let mut inner = self.inner.borrow_mut();
                // Observers added during delivery stay registered.
                observers.extend(inner.state_observers.drain(..));
                inner.state_observers = observers;
            }
        }
    }

    fn restore_subscribers(&self, mut taken: Vec<(SubscriberId, InstanceCallback, HostCallback)>) {
        let mut inner = self.inner.borrow_mut();
        let added = inner.subscribers.drain(..).collect::<Vec<_>>();
        taken.extend(added);
        inner.subscribers = taken;
    }
}

impl Publisher for LocalPublisher {
    fn start(&mut self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.state == State::Ready {
            return Ok(());
        }
        info!("Starting mDNS publisher");
        inner.state = State::Ready;
        inner
            .pending
            .push_back(Notification::StateChanged(State::Ready));
        Ok(())
    }

    fn stop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == State::Idle {
            return;
        }
        info!("Stopping mDNS publisher");
        inner.state = State::Idle;
        // Registrations do not survive a backend restart; subscriptions do.
        inner.services.clear();
        inner.instances_by_type = MultiMap::new();
        inner.hosts.clear();
        inner.keys.clear();
        inner
            .pending
            .push_back(Notification::StateChanged(State::Idle));
    }

    fn is_started(&self) -> bool {
        self.inner.borrow().state == State::Ready
    }

    fn state(&self) -> State {
        self.inner.borrow().state
    }

    fn add_state_observer(&mut self, observer: StateObserver) {
        self.inner.borrow_mut().state_observers.push(observer);
    }

    fn publish_service(
        &mut self,
        host_name: &str,
        instance_name: &str,
        service_type: &str,
        sub_types: &[String],
        port: u16,
        txt_data: &[u8],
        callback: ResultCallback,
    ) {
        let mut inner = self.inner.borrow_mut();
        if let Err(err) = inner.check_started() {
            inner.complete(callback, Err(err));
            return;
        }

        debug!("Publishing service {instance_name}.{service_type} on {host_name}:{port}");

        let key = ServiceKey {
            service_type: service_type.to_owned(),
            instance_name: instance_name.to_owned(),
        };
        let record = ServiceRecord {
            host_name: host_name.to_owned(),
            sub_types: sub_types.to_vec(),
            port,
            txt_data: txt_data.to_vec(),
        };

        if inner.services.insert(key.clone(), record).is_none() {
            inner
                .instances_by_type
                .insert(service_type.to_owned(), instance_name.to_owned());
        }

        inner.notify_service(&key);
        inner.complete(callback, Ok(()));
    }

    fn unpublish_service(&mut self, instance_name: &str, service_type: &str, callback: ResultCallback) {
        let mut inner = self.inner.borrow_mut();
        if let Err(err) = inner.check_started() {
            inner.complete(callback, Err(err));
            return;
        }

        debug!("Unpublishing service {instance_name}.{service_type}");

        let key = ServiceKey {
            service_type: service_type.to_owned(),
            instance_name: instance_name.to_owned(),
        };
        inner.services.remove(&key);
        if let Some(instances) = inner.instances_by_type.get_vec_mut(service_type) {
            instances.retain(|name| name != instance_name);
        }

        // A goodbye announcement goes out whether or not we knew the
        // instance.
        inner.notify_service_removed(&key);
        inner.complete(callback, Ok(()));
    }

    fn publish_host(&mut self, host_name: &str, addresses: &[Ipv6Addr], callback: ResultCallback) {
        let mut inner = self.inner.borrow_mut();
        if let Err(err) = inner.check_started() {
            inner.complete(callback, Err(err));
            return;
        }

        debug!("Publishing host {host_name} with {} addresses", addresses.len());

        inner
            .hosts
            .insert(host_name.to_owned(), addresses.to_vec());
        inner.notify_host(host_name);
        inner.complete(callback, Ok(()));
    }

    fn unpublish_host(&mut self, host_name: &str, callback: ResultCallback) {
        let mut inner = self.inner.borrow_mut();
        if let Err(err) = inner.check_started() {
            inner.complete(callback, Err(err));
            return;
        }

        debug!("Unpublishing host {host_name}");
        inner.hosts.remove(host_name);
        inner.complete(callback, Ok(()));
    }

    fn publish_key(&mut self, name: &str, key_data: &[u8], callback: ResultCallback) {
        let mut inner = self.inner.borrow_mut();
        if let Err(err) = inner.check_started() {
            inner.complete(callback, Err(err));
            return;
        }

        debug!("Publishing key record for {name}");
        inner.keys.insert(name.to_owned(), key_data.to_vec());
        inner.complete(callback, Ok(()));
    }

    fn unpublish_key(&mut self, name: &str, callback: ResultCallback) {
        let mut inner = self.inner.borrow_mut();
        if let Err(err) = inner.check_started() {
            inner.complete(callback, Err(err));
            return;
        }

        debug!("Unpublishing key record for {name}");
        inner.keys.remove(name);
        inner.complete(callback, Ok(()));
    }

    fn subscribe_service(&mut self, service_type: &str, instance_name: &str) {
        let mut inner = self.inner.borrow_mut();
        let subscription = ServiceSubscription {
            service_type: service_type.to_owned(),
            instance_name: instance_name.to_owned(),
        };
        if inner.service_subscriptions.contains(&subscription) {
            return;
        }
        inner.service_subscriptions.push(subscription);

        // Answer the new subscription from the existing registry, the way a
        // cache would.
        let matching: Vec<String> = inner
            .instances_by_type
            .get_vec(service_type)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|name| instance_name.is_empty() || *name == instance_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for name in matching {
            let key = ServiceKey {
                service_type: service_type.to_owned(),
                instance_name: name,
            };
            inner.notify_service(&key);
        }
    }

    fn unsubscribe_service(&mut self, service_type: &str, instance_name: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.service_subscriptions.retain(|sub| {
            !(sub.service_type == service_type && sub.instance_name == instance_name)
        });
    }

    fn subscribe_host(&mut self, host_name: &str) {
        let mut inner = self.inner.borrow_mut();
        if inner.host_subscriptions.iter().any(|h| h == host_name) {
            return;
        }
        inner.host_subscriptions.push(host_name.to_owned());
        inner.notify_host(host_name);
    }

    fn unsubscribe_host(&mut self, host_name: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.host_subscriptions.retain(|h| h != host_name);
    }

    fn add_subscription_callbacks(
        &mut self,
        instance_callback: InstanceCallback,
        host_callback: HostCallback,
    ) -> SubscriberId {
        let mut inner = self.inner.borrow_mut();
        inner.next_subscriber_id += 1;
        let id = inner.next_subscriber_id;
        inner
            .subscribers
            .push((id, instance_callback, host_callback));
        id
    }

    fn remove_subscription_callbacks(&mut self, id: SubscriberId) {
        let mut inner = self.inner.borrow_mut();
        inner.subscribers.retain(|(sid, _, _)| *sid != id);
    }
}

impl MainloopProcessor for LocalPublisher {
    fn update(&mut self, context: &mut MainloopContext) {
        if self.has_pending_notifications() {
            context.set_timeout_if_earlier(std::time::Duration::from_millis(0));
        }
    }

    fn process(&mut self, _context: &MainloopContext) {
        // Pop one at a time so callbacks may re-enter the publisher.
        loop {
            let notification = self.inner.borrow_mut().pending.pop_front();
            match notification {
                Some(notification) => self.deliver(notification),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pump(publisher: &mut LocalPublisher) {
        let context = MainloopContext::new(std::time::Duration::from_millis(0));
        publisher.process(&context);
    }

    #[test]
    fn test_publish_before_start_fails_with_invalid_state() {
        let mut publisher = LocalPublisher::new();
        let failures = Arc::new(AtomicUsize::new(0));

        let f = failures.clone();
        publisher.publish_host(
            "host1",
            &[],
            Box::new(move |result| {
                assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        pump(&mut publisher);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subtype_browse_matches_service() {
        let mut publisher = LocalPublisher::new();
        publisher.start().unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        publisher.add_subscription_callbacks(
            Box::new(move |_, info| {
                assert_eq!(info.instance_name, "svc");
                s.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|_, _| {}),
        );
        publisher.subscribe_service("_sub1._sub._test._udp", "");

        publisher.publish_service(
            "host1",
            "svc",
            "_test._udp",
            &["_sub1".to_owned()],
            1,
            &[],
            Box::new(|_| {}),
        );
        pump(&mut publisher);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_republish_overwrites_record() {
        let mut publisher = LocalPublisher::new();
        publisher.start().unwrap();

        publisher.publish_service("host1", "svc", "_test._udp", &[], 1, &[], Box::new(|_| {}));
        publisher.publish_service("host1", "svc", "_test._udp", &[], 2, &[], Box::new(|_| {}));
        pump(&mut publisher);

        let inner = publisher.inner.borrow();
        let key = ServiceKey {
            service_type: "_test._udp".to_owned(),
            instance_name: "svc".to_owned(),
        };
        assert_eq!(inner.services.get(&key).unwrap().port, 2);
        assert_eq!(inner.instances_by_type.get_vec("_test._udp").unwrap().len(), 1);
    }
}
