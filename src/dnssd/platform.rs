//! Shim between the Thread stack's dnssd platform requests and the
//! [`Publisher`](crate::dnssd::Publisher).
//!
//! Requests arrive with a caller-chosen [`RequestId`]; the platform forwards
//! them to the publisher and correlates the publisher's completion back to
//! the id so the stack can finish the originating transaction.

use std::cell::RefCell;
use std::net::Ipv6Addr;
use std::rc::Rc;

use log::debug;

use crate::dnssd::{Publisher, State};
use crate::error::Result;

/// Correlation id supplied by the Thread stack with each request.
pub type RequestId = u32;

/// Completion callback for a platform request.
pub type RegisterCallback = Box<dyn FnOnce(RequestId, Result<()>)>;

/// Callback invoked whenever the platform state changes.
pub type StateChangedCallback = Box<dyn FnMut(PlatformState)>;

/// Aggregate platform state reported to the Thread stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformState {
    Stopped,
    Ready,
}

/// A service registration request from the Thread stack.
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    pub host_name: String,
    pub service_instance: String,
    pub service_type: String,
    pub sub_type_labels: Vec<String>,
    pub port: u16,
    pub txt_data: Vec<u8>,
}

/// A host registration request from the Thread stack.
#[derive(Debug, Clone, Default)]
pub struct HostRequest {
    pub host_name: String,
    pub addresses: Vec<Ipv6Addr>,
}

/// A KEY record registration request from the Thread stack.
#[derive(Debug, Clone, Default)]
pub struct KeyRequest {
    pub name: String,
    pub service_type: Option<String>,
    pub key_data: Vec<u8>,
}

impl KeyRequest {
    /// Record name; a key attached to a service instance is qualified with
    /// the service type.
    pub fn record_name(&self) -> String {
        match &self.service_type {
            Some(service_type) => format!("{}.{}", self.name, service_type),
            None => self.name.clone(),
        }
    }
}

/// State machine tying one publisher to the Thread stack's dnssd platform.
pub struct DnssdPlatform {
    publisher: Rc<RefCell<dyn Publisher>>,
    state: PlatformState,
    running: bool,
    publisher_state: State,
    state_changed_callback: Option<StateChangedCallback>,
}

impl DnssdPlatform {
    pub fn new(publisher: Rc<RefCell<dyn Publisher>>) -> Self {
        DnssdPlatform {
            publisher,
            state: PlatformState::Stopped,
            running: false,
            publisher_state: State::Idle,
            state_changed_callback: None,
        }
    }

    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.update_state();
        }
    }

    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.update_state();
        }
    }

    pub fn state(&self) -> PlatformState {
        self.state
    }

    pub fn set_state_changed_callback(&mut self, callback: StateChangedCallback) {
        self.state_changed_callback = Some(callback);
    }

    /// Feed of the publisher's state transitions; wired up by the agent.
    pub fn handle_publisher_state(&mut self, state: State) {
        if self.publisher_state != state {
            self.publisher_state = state;
            self.update_state();
        }
    }

    fn update_state(&mut self) {
        let next = if self.running && self.publisher_state == State::Ready {
            PlatformState::Ready
        } else {
            PlatformState::Stopped
        };
        if next == self.state {
            return;
        }

        debug!("DNS-SD platform state: {:?} -> {next:?}", self.state);
        self.state = next;
        if let Some(callback) = self.state_changed_callback.as_mut() {
            callback(next);
        }
    }

    pub fn register_service(&mut self, service: &ServiceRequest, request_id: RequestId, callback: RegisterCallback) {
        self.publisher.borrow_mut().publish_service(
            &service.host_name,
            &service.service_instance,
            &service.service_type,
            &service.sub_type_labels,
            service.port,
            &service.txt_data,
            make_publisher_callback(request_id, callback),
        );
    }

    pub fn unregister_service(&mut self, service: &ServiceRequest, request_id: RequestId, callback: RegisterCallback) {
        self.publisher.borrow_mut().unpublish_service(
            &service.service_instance,
            &service.service_type,
            make_publisher_callback(request_id, callback),
        );
    }

    pub fn register_host(&mut self, host: &HostRequest, request_id: RequestId, callback: RegisterCallback) {
        self.publisher.borrow_mut().publish_host(
            &host.host_name,
            &host.addresses,
            make_publisher_callback(request_id, callback),
        );
    }

    pub fn unregister_host(&mut self, host: &HostRequest, request_id: RequestId, callback: RegisterCallback) {
        self.publisher
            .borrow_mut()
            .unpublish_host(&host.host_name, make_publisher_callback(request_id, callback));
    }

    pub fn register_key(&mut self, key: &KeyRequest, request_id: RequestId, callback: RegisterCallback) {
        self.publisher.borrow_mut().publish_key(
            &key.record_name(),
            &key.key_data,
            make_publisher_callback(request_id, callback),
        );
    }

    pub fn unregister_key(&mut self, key: &KeyRequest, request_id: RequestId, callback: RegisterCallback) {
        self.publisher
            .borrow_mut()
            .unpublish_key(&key.record_name(), make_publisher_callback(request_id, callback));
    }

    /// Convenience for callers that only need the running/ready invariant.
    pub fn is_ready(&self) -> bool {
        self.state == PlatformState::Ready
    }
}

fn make_publisher_callback(
    request_id: RequestId,
    callback: RegisterCallback,
) -> crate::dnssd::ResultCallback {
    Box::new(move |result| callback(request_id, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::local::LocalPublisher;
    use crate::mainloop::{MainloopContext, MainloopProcessor};
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn test_state_is_ready_iff_running_and_publisher_ready() {
        let publisher = LocalPublisher::new();
        let shared = Rc::new(RefCell::new(publisher.clone()));
        let mut platform = DnssdPlatform::new(shared);

        assert_eq!(platform.state(), PlatformState::Stopped);

        platform.start();
        assert_eq!(platform.state(), PlatformState::Stopped);

        platform.handle_publisher_state(State::Ready);
        assert_eq!(platform.state(), PlatformState::Ready);

        platform.handle_publisher_state(State::Idle);
        assert_eq!(platform.state(), PlatformState::Stopped);

        platform.handle_publisher_state(State::Ready);
        platform.stop();
        assert_eq!(platform.state(), PlatformState::Stopped);
    }

    #[test]
    fn test_register_service_passes_request_id_through() {
        let mut publisher = LocalPublisher::new();
        publisher.start().unwrap();
        let shared: Rc<RefCell<dyn Publisher>> = Rc::new(RefCell::new(publisher.clone()));
        let mut platform = DnssdPlatform::new(shared);

        let seen = Rc::new(Cell::new(0u32));
        let seen_cb = seen.clone();
        platform.register_service(
            &ServiceRequest {
                host_name: "host1".to_owned(),
                service_instance: "svc".to_owned(),
                service_type: "_srv._udp".to_owned(),
                port: 1234,
                ..ServiceRequest::default()
            },
            42,
            Box::new(move |id, result| {
                assert!(result.is_ok());
                seen_cb.set(id);
            }),
        );

        let context = MainloopContext::new(Duration::from_millis(0));
        publisher.process(&context);
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn test_key_record_name_qualified_by_service_type() {
        let key = KeyRequest {
            name: "otbr".to_owned(),
            service_type: Some("_srp._udp".to_owned()),
            ..KeyRequest::default()
        };
        assert_eq!(key.record_name(), "otbr._srp._udp");

        let bare = KeyRequest {
            name: "host1".to_owned(),
            ..KeyRequest::default()
        };
        assert_eq!(bare.record_name(), "host1");
    }
}
