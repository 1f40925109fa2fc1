//! Agent runtime: constructs every component, wires their callbacks and runs
//! the mainloop until terminated.

use std::cell::RefCell;
use std::io;
use std::net::Ipv6Addr;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::advertising_proxy::AdvertisingProxy;
use crate::border_agent::BorderAgent;
use crate::dbus::agent::DBusAgent;
use crate::dbus::connection::DBusConnection;
use crate::dbus::thread_object::DBusThreadObject;
use crate::dnssd::local::LocalPublisher;
use crate::dnssd::platform::DnssdPlatform;
use crate::dnssd::Publisher;
use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::{MainloopBreaker, MainloopManager};
use crate::net;
use crate::ot::InstanceConfig;
use crate::rcp_host::RcpHost;
use crate::task_runner::TaskRunner;
use crate::udp_proxy::{UdpForwarder, UdpProxy};

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

static SHOULD_TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(signal: libc::c_int) {
    SHOULD_TERMINATE.store(true, Ordering::SeqCst);
    // A second signal falls through to the default action and kills the
    // process immediately.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
    }
}

/// Agent-level configuration assembled by the process entry point.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub interface_name: String,
    pub backbone_interface_name: Option<String>,
    pub radio_urls: Vec<String>,
    pub dry_run: bool,
    pub enable_auto_attach: bool,
    pub vendor_name: String,
    pub product_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            interface_name: "wpan0".to_owned(),
            backbone_interface_name: None,
            radio_urls: Vec::new(),
            dry_run: false,
            enable_auto_attach: true,
            vendor_name: "OpenThread".to_owned(),
            product_name: "BorderRouter".to_owned(),
        }
    }
}

// Injects host-received datagrams into the Thread stack.
struct HostUdpForwarder {
    host: Weak<RefCell<RcpHost>>,
}

impl UdpForwarder for HostUdpForwarder {
    fn udp_forward(&mut self, payload: &[u8], remote_addr: Ipv6Addr, remote_port: u16, proxy: &UdpProxy) {
        if let Some(host) = self.host.upgrade() {
            let mut host = host.borrow_mut();
            if let Some(instance) = host.instance_mut() {
                instance.udp_forward_receive(payload, remote_addr, remote_port, proxy.thread_port());
            }
        }
    }
}

/// The explicit runtime root owning every component of the agent.
pub struct Application {
    manager: MainloopManager,
    task_runner: Arc<TaskRunner>,
    host: Rc<RefCell<RcpHost>>,
    publisher: LocalPublisher,
    platform: Rc<RefCell<DnssdPlatform>>,
    advertising_proxy: AdvertisingProxy,
    border_agent: Rc<RefCell<BorderAgent>>,
    udp_proxy: Rc<RefCell<UdpProxy>>,
    dbus_connection: DBusConnection,
    thread_object: Option<DBusThreadObject>,
    config: AgentConfig,
}

impl Application {
    pub fn new(config: AgentConfig) -> io::Result<Self> {
        let mut manager = MainloopManager::new();

        let task_runner = Arc::new(TaskRunner::new()?);
        manager.add_processor(Rc::new(RefCell::new(task_runner.clone())));

        let instance_config = InstanceConfig {
            interface_name: config.interface_name.clone(),
            radio_urls: config.radio_urls.clone(),
            backbone_interface_name: config.backbone_interface_name.clone(),
            dry_run: config.dry_run,
        };
        let host = Rc::new(RefCell::new(RcpHost::new(
            instance_config,
            config.enable_auto_attach,
        )));
        manager.add_processor(host.clone());

        let publisher = LocalPublisher::new();
        if let Some(infra) = &config.backbone_interface_name {
            publisher.set_netif_index(net::if_index(infra));
        }
        manager.add_processor(Rc::new(RefCell::new(publisher.clone())));

        let shared_publisher: Rc<RefCell<dyn Publisher>> =
            Rc::new(RefCell::new(publisher.clone()));
        let platform = Rc::new(RefCell::new(DnssdPlatform::new(shared_publisher.clone())));
        let advertising_proxy = AdvertisingProxy::new(shared_publisher.clone());

        let udp_proxy = Rc::new(RefCell::new(UdpProxy::new(Rc::new(RefCell::new(
            HostUdpForwarder {
                host: Rc::downgrade(&host),
            },
        )))));
        manager.add_processor(udp_proxy.clone());

        let border_agent = Rc::new(RefCell::new(BorderAgent::new(
            shared_publisher,
            udp_proxy.clone(),
            config.vendor_name.clone(),
            config.product_name.clone(),
        )));

        let dbus_connection = DBusConnection::new(&config.interface_name)?;
        manager.add_processor(Rc::new(RefCell::new(DBusAgent::new(
            dbus_connection.clone(),
        ))));

        Ok(Application {
            manager,
            task_runner,
            host,
            publisher,
            platform,
            advertising_proxy,
            border_agent,
            udp_proxy,
            dbus_connection,
            thread_object: None,
            config,
        })
    }

    /// Initialises the stack, wires cross-component callbacks, registers the
    /// D-Bus object and starts the DNS-SD machinery.
    pub fn init(&mut self) -> Result<()> {
        self.host.borrow_mut().init()?;

        // SRP updates flow to the advertising proxy.
        let proxy = self.advertising_proxy.clone();
        self.host
            .borrow_mut()
            .set_srp_advertising_handler(Box::new(move |instance, update| {
                proxy.handle_srp_update(instance, update);
            }));

        // Finished transactions flow back to the SRP server.
        let weak_host = Rc::downgrade(&self.host);
        self.advertising_proxy
            .set_responder(Box::new(move |id, result| {
                if let Some(host) = weak_host.upgrade() {
                    host.borrow_mut().srp_server_respond(id, result);
                }
            }));

        // Outbound UDP forwarding to host-side peers.
        let udp_proxy = self.udp_proxy.clone();
        self.host
            .borrow_mut()
            .set_udp_forward_send_handler(Box::new(move |payload, peer_addr, peer_port, thread_port| {
                let proxy = udp_proxy.borrow();
                if proxy.thread_port() == thread_port {
                    proxy.send_to_peer(payload, peer_addr, peer_port);
                }
            }));

        // MeshCoP advertisement follows stack state.
        let border_agent = self.border_agent.clone();
        self.host
            .borrow_mut()
            .add_thread_state_changed_callback(Box::new(move |flags, instance| {
                border_agent.borrow_mut().handle_state_changed(instance, flags);
            }));

        // Publisher readiness feeds the DNS-SD platform and the proxy.
        let platform = self.platform.clone();
        self.publisher
            .add_state_observer(Box::new(move |state| {
                platform.borrow_mut().handle_publisher_state(state);
            }));
        let proxy = self.advertising_proxy.clone();
        let weak_host = Rc::downgrade(&self.host);
        self.publisher.add_state_observer(Box::new(move |state| {
            if let Some(host) = weak_host.upgrade() {
                let mut host = host.borrow_mut();
                if let Some(instance) = host.instance_mut() {
                    proxy.handle_publisher_state(instance, state);
                }
            }
        }));

        self.thread_object = Some(DBusThreadObject::new(
            &self.dbus_connection,
            &self.host,
            &self.border_agent,
            self.config.backbone_interface_name.clone(),
        )?);

        self.publisher.start()?;
        self.platform.borrow_mut().start();

        {
            let mut host = self.host.borrow_mut();
            if let Some(instance) = host.instance_mut() {
                self.advertising_proxy.set_enabled(true, instance);
                self.border_agent.borrow_mut().update_meshcop_service(instance);
            }
        }

        Ok(())
    }

    /// Runs the mainloop until SIGTERM or an explicit break.
    pub fn run(&mut self) -> Result<()> {
        info!("Border router agent started.");
        let handler = handle_signal as extern "C" fn(libc::c_int);
        unsafe {
            libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
        }

        while !SHOULD_TERMINATE.load(Ordering::SeqCst) {
            match self.manager.poll(POLL_TIMEOUT) {
                Ok(true) => break,
                Ok(false) => continue,
                Err(err) => {
                    return Err(Error::new(
                        ErrorKind::Generic,
                        format!("Mainloop failed: {err}"),
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn breaker(&self) -> MainloopBreaker {
        self.manager.breaker()
    }

    pub fn manager_mut(&mut self) -> &mut MainloopManager {
        &mut self.manager
    }

    pub fn task_runner(&self) -> Arc<TaskRunner> {
        self.task_runner.clone()
    }

    pub fn host(&self) -> Rc<RefCell<RcpHost>> {
        self.host.clone()
    }

    pub fn publisher(&self) -> LocalPublisher {
        self.publisher.clone()
    }

    pub fn dnssd_platform(&self) -> Rc<RefCell<DnssdPlatform>> {
        self.platform.clone()
    }

    pub fn advertising_proxy(&self) -> AdvertisingProxy {
        self.advertising_proxy.clone()
    }

    pub fn udp_proxy(&self) -> Rc<RefCell<UdpProxy>> {
        self.udp_proxy.clone()
    }

    pub fn dbus_connection(&self) -> DBusConnection {
        self.dbus_connection.clone()
    }

    pub fn thread_object(&self) -> Option<&DBusThreadObject> {
        self.thread_object.as_ref()
    }
}
