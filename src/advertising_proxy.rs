//! Mirrors SRP server registrations into mDNS.
//!
//! Each SRP update transaction publishes (or withdraws) one host and its
//! services through the publisher. Every publisher call counts toward the
//! transaction; the first failure wins and the SRP server is notified once
//! the last callback lands.

use std::cell::RefCell;
use std::net::Ipv6Addr;
use std::rc::{Rc, Weak};

use log::{debug, info, warn};

use crate::dnssd::{Publisher, State};
use crate::error::{Error, Result};
use crate::ot::srp::{SrpHost, SrpUpdate};
use crate::ot::{InstanceInterface, SrpUpdateId};

/// Notifies the SRP server of a finished transaction; wired to
/// `RcpHost::srp_server_respond` by the agent.
pub type SrpResponder = Box<dyn FnMut(SrpUpdateId, Result<()>)>;

struct OutstandingUpdate {
    id: SrpUpdateId,
    host_name: String,
    callback_count: u32,
    first_error: Option<Error>,
}

struct Inner {
    enabled: bool,
    publisher: Rc<RefCell<dyn Publisher>>,
    responder: Option<SrpResponder>,
    outstanding: Vec<OutstandingUpdate>,
}

impl Inner {
    /// Records one publisher completion. Returns the aggregate outcome when
    /// the transaction has fully drained.
    fn note_result(&mut self, id: SrpUpdateId, result: Result<()>) -> Option<Result<()>> {
        let position = self.outstanding.iter().position(|update| update.id == id)?;
        let update = &mut self.outstanding[position];

        if let Err(err) = result {
            if update.first_error.is_none() {
                update.first_error = Some(err);
            }
        }

        update.callback_count = update.callback_count.saturating_sub(1);
        if update.callback_count > 0 {
            return None;
        }

        let update = self.outstanding.remove(position);
        debug!(
            "SRP update {} for {} finished",
            update.id, update.host_name
        );
        Some(match update.first_error {
            Some(err) => Err(err),
            None => Ok(()),
        })
    }
}

#[derive(Clone)]
pub struct AdvertisingProxy {
    inner: Rc<RefCell<Inner>>,
}

impl AdvertisingProxy {
    pub fn new(publisher: Rc<RefCell<dyn Publisher>>) -> Self {
        AdvertisingProxy {
            inner: Rc::new(RefCell::new(Inner {
                enabled: false,
                publisher,
                responder: None,
                outstanding: Vec::new(),
            })),
        }
    }

    pub fn set_responder(&self, responder: SrpResponder) {
        self.inner.borrow_mut().responder = Some(responder);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.borrow().enabled
    }

    /// Enables or disables advertising. Enabling republishes everything the
    /// SRP server currently holds.
    pub fn set_enabled(&self, enabled: bool, instance: &mut dyn InstanceInterface) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.enabled == enabled {
                return;
            }
            info!("Advertising proxy {}", if enabled { "enabled" } else { "disabled" });
            inner.enabled = enabled;
            if !enabled {
                // In-flight transactions are orphaned; late callbacks find no
                // entry and are ignored.
                inner.outstanding.clear();
            }
        }
        if enabled {
            self.publish_all_hosts_and_services(instance);
        }
    }

    /// Handles one SRP update transaction from the SRP server.
    pub fn handle_srp_update(&self, instance: &mut dyn InstanceInterface, update: SrpUpdate) {
        if !self.inner.borrow().enabled {
            // Nothing published while disabled; answer the transaction so the
            // server is not left waiting.
            instance.srp_server_respond(update.id, Ok(()));
            return;
        }

        debug!(
            "Advertising SRP update {} for host {} ({} services)",
            update.id,
            update.host.host_name,
            update.host.services.len()
        );

        // One pending completion for the host record plus one per service;
        // recorded before any publisher call so early callbacks correlate.
        self.inner.borrow_mut().outstanding.push(OutstandingUpdate {
            id: update.id,
            host_name: update.host.host_name.clone(),
            callback_count: 1 + update.host.services.len() as u32,
            first_error: None,
        });

        self.publish_host_and_services(&update.host, Some(update.id));
    }

    /// Re-publishes the SRP server's full state, outside any transaction.
    pub fn publish_all_hosts_and_services(&self, instance: &mut dyn InstanceInterface) {
        if !self.inner.borrow().enabled {
            return;
        }
        for host in instance.srp_server_hosts() {
            if !host.deleted {
                self.publish_host_and_services(&host, None);
            }
        }
    }

    /// Reacts to publisher state changes: on `Ready` everything is
    /// republished, otherwise the publisher has dropped its registrations
    /// and there is nothing to do until it recovers.
    pub fn handle_publisher_state(&self, instance: &mut dyn InstanceInterface, state: State) {
        if state == State::Ready {
            self.publish_all_hosts_and_services(instance);
        }
    }

    fn publish_host_and_services(&self, host: &SrpHost, update_id: Option<SrpUpdateId>) {
        let publisher = self.inner.borrow().publisher.clone();
        let mut publisher = publisher.borrow_mut();

        if host.deleted {
            for service in &host.services {
                publisher.unpublish_service(
                    &service.instance_name,
                    &service.service_type,
                    self.make_callback(update_id),
                );
            }
            publisher.unpublish_host(&host.host_name, self.make_callback(update_id));
            return;
        }

        let addresses = eligible_addresses(&host.addresses);
        if addresses.is_empty() {
            warn!("Host {} has no addresses eligible for mDNS", host.host_name);
        }
        publisher.publish_host(&host.host_name, &addresses, self.make_callback(update_id));

        for service in &host.services {
            if service.deleted {
                publisher.unpublish_service(
                    &service.instance_name,
                    &service.service_type,
                    self.make_callback(update_id),
                );
            } else {
                publisher.publish_service(
                    &host.host_name,
                    &service.instance_name,
                    &service.service_type,
                    &service.sub_type_labels,
                    service.port,
                    &service.txt_data,
                    self.make_callback(update_id),
                );
            }
        }
    }

    fn make_callback(&self, update_id: Option<SrpUpdateId>) -> crate::dnssd::ResultCallback {
        let weak = Rc::downgrade(&self.inner);
        Box::new(move |result| {
            if let Err(err) = &result {
                warn!("mDNS publish request failed: {err}");
            }
            let id = match update_id {
                Some(id) => id,
                None => return,
            };
            if let Some(inner) = Weak::upgrade(&weak) {
                finish_if_drained(&inner, id, result);
            }
        })
    }
}

fn finish_if_drained(inner: &Rc<RefCell<Inner>>, id: SrpUpdateId, result: Result<()>) {
    let aggregate = inner.borrow_mut().note_result(id, result);
    let aggregate = match aggregate {
        Some(aggregate) => aggregate,
        None => return,
    };

    // The responder may re-enter the proxy; call it with no borrow held.
    let responder = inner.borrow_mut().responder.take();
    if let Some(mut responder) = responder {
        responder(id, aggregate);
        let mut guard = inner.borrow_mut();
        if guard.responder.is_none() {
            guard.responder = Some(responder);
        }
    } else {
        warn!("No SRP responder configured; update {id} dropped");
    }
}

/// Addresses worth advertising on the infrastructure link: no link-local,
/// loopback, multicast or unspecified entries.
pub fn eligible_addresses(addresses: &[Ipv6Addr]) -> Vec<Ipv6Addr> {
    addresses
        .iter()
        .copied()
        .filter(|addr| {
            !addr.is_loopback()
                && !addr.is_multicast()
                && !addr.is_unspecified()
                && (addr.segments()[0] & 0xffc0) != 0xfe80
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::local::LocalPublisher;
    use crate::mainloop::{MainloopContext, MainloopProcessor};
    use crate::ot::sim::SimulatedInstance;
    use crate::ot::srp::SrpService;
    use crate::ot::InstanceConfig;
    use std::time::Duration;

    fn sim_instance() -> SimulatedInstance {
        SimulatedInstance::new(&InstanceConfig {
            interface_name: "wpan0".to_owned(),
            radio_urls: Vec::new(),
            backbone_interface_name: None,
            dry_run: true,
        })
    }

    fn sample_update(id: SrpUpdateId) -> SrpUpdate {
        SrpUpdate {
            id,
            host: SrpHost {
                host_name: "host1".to_owned(),
                addresses: vec!["fd00::1".parse().unwrap(), "fe80::1".parse().unwrap()],
                deleted: false,
                services: vec![SrpService {
                    instance_name: "camera".to_owned(),
                    service_type: "_srv._udp".to_owned(),
                    port: 1234,
                    ..SrpService::default()
                }],
            },
            timeout_ms: 1000,
        }
    }

    #[test]
    fn test_srp_update_publishes_and_responds_once() {
        let mut publisher = LocalPublisher::new();
        publisher.start().unwrap();
        let shared: Rc<RefCell<dyn Publisher>> = Rc::new(RefCell::new(publisher.clone()));
        let proxy = AdvertisingProxy::new(shared);

        let responses: Rc<RefCell<Vec<(SrpUpdateId, Result<()>)>>> =
            Rc::new(RefCell::new(Vec::new()));
        let sink = responses.clone();
        proxy.set_responder(Box::new(move |id, result| {
            sink.borrow_mut().push((id, result));
        }));

        let mut instance = sim_instance();
        proxy.set_enabled(true, &mut instance);
        proxy.handle_srp_update(&mut instance, sample_update(7));

        // Host and service completions arrive on the next publisher pass.
        let context = MainloopContext::new(Duration::from_millis(0));
        publisher.process(&context);

        assert_eq!(*responses.borrow(), vec![(7, Ok(()))]);
    }

    #[test]
    fn test_disabled_proxy_answers_updates_without_publishing() {
        let publisher = LocalPublisher::new();
        let shared: Rc<RefCell<dyn Publisher>> = Rc::new(RefCell::new(publisher));
        let proxy = AdvertisingProxy::new(shared);

        let mut instance = sim_instance();
        proxy.handle_srp_update(&mut instance, sample_update(9));

        assert_eq!(instance.srp_responses().to_vec(), vec![(9, Ok(()))]);
    }

    #[test]
    fn test_first_publisher_error_wins() {
        // Publisher left idle so every request fails with InvalidState.
        let mut publisher = LocalPublisher::new();
        let shared: Rc<RefCell<dyn Publisher>> = Rc::new(RefCell::new(publisher.clone()));
        let proxy = AdvertisingProxy::new(shared);

        let responses: Rc<RefCell<Vec<(SrpUpdateId, Result<()>)>>> =
            Rc::new(RefCell::new(Vec::new()));
        let sink = responses.clone();
        proxy.set_responder(Box::new(move |id, result| {
            sink.borrow_mut().push((id, result));
        }));

        let mut instance = sim_instance();
        {
            let mut inner = proxy.inner.borrow_mut();
            inner.enabled = true;
        }
        proxy.handle_srp_update(&mut instance, sample_update(11));

        let context = MainloopContext::new(Duration::from_millis(0));
        publisher.process(&context);

        let responses = responses.borrow();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, 11);
        assert_eq!(
            responses[0].1.as_ref().unwrap_err().kind(),
            crate::error::ErrorKind::InvalidState
        );
    }

    #[test]
    fn test_eligible_addresses_filters_special_scopes() {
        let addresses = vec![
            "2002::1".parse().unwrap(),
            "fe80::1".parse().unwrap(),
            "::1".parse().unwrap(),
            "ff02::fb".parse().unwrap(),
            "::".parse().unwrap(),
            "fd00::2".parse().unwrap(),
        ];
        let eligible = eligible_addresses(&addresses);
        assert_eq!(
            eligible,
            vec![
                "2002::1".parse::<Ipv6Addr>().unwrap(),
                "fd00::2".parse::<Ipv6Addr>().unwrap()
            ]
        );
    }
}
