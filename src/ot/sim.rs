//! Deterministic in-process Thread stack.
//!
//! Backs dry-run operation and the test suite: role transitions, scan and
//! joiner completions and management-set round trips happen on short timers
//! driven from the mainloop, and persistent settings survive a reset the way
//! the real stack's settings blob does.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::{thread_rng, Rng};

use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::MainloopContext;
use crate::ot::srp::{SrpHost, SrpUpdate};
use crate::ot::{
    ActiveScanResult, BorderRoutingCounters, ChangedFlags, ChannelMaxPower, DatasetTlvs,
    DeviceRole, DnssdCounters, EnergyScanResult, Event, ExternalRoute, InstanceConfig,
    InstanceInterface, IpCounters, Ip6Prefix, JoinerStartInfo, LeaderData, LinkModeConfig,
    MacCounters, Nat64Mapping, Nat64State, OnMeshPrefix, OperationalDataset, SrpServerInfo,
    SrpServerState, SrpUpdateId, TrelInfo,
};

const ATTACH_DELAY: Duration = Duration::from_millis(10);
const DETACH_DELAY: Duration = Duration::from_millis(10);
const SCAN_DURATION: Duration = Duration::from_millis(20);
const JOINER_DURATION: Duration = Duration::from_millis(20);

const SIM_BORDER_AGENT_PORT: u16 = 49154;
const SUPPORTED_CHANNEL_MASK: u32 = 0x07ff_f800;

/// Settings blob shared across instance incarnations, mirroring the stack's
/// persisted storage.
#[derive(Default)]
pub struct SimSettings {
    active_dataset: Option<DatasetTlvs>,
    pending_dataset: Option<DatasetTlvs>,
}

enum PendingOp {
    BecomeLeader,
    FinishDetach,
    FinishScan,
    FinishEnergyScan { channel_mask: u32 },
    FinishJoiner,
    FinishMgmtPendingSet { dataset: DatasetTlvs },
    ExpireEphemeralKey,
}

/// A datagram injected toward the Thread stack via UDP forwarding; kept for
/// inspection by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedDatagram {
    pub payload: Vec<u8>,
    pub peer_addr: Ipv6Addr,
    pub peer_port: u16,
    pub local_port: u16,
}

pub struct SimulatedInstance {
    config: InstanceConfig,
    settings: Rc<RefCell<SimSettings>>,
    started_at: Instant,
    role: DeviceRole,
    ip6_enabled: bool,
    thread_enabled: bool,
    events: VecDeque<Event>,
    timers: Vec<(Instant, PendingOp)>,
    ext_address: u64,
    link_mode: LinkModeConfig,
    mesh_local_prefix_override: Option<[u8; 8]>,
    nat64_enabled: bool,
    nat64_cidr: Option<String>,
    trel_enabled: bool,
    srp_enabled: bool,
    srp_hosts: Vec<SrpHost>,
    srp_responses: Vec<(SrpUpdateId, Result<()>)>,
    on_mesh_prefixes: Vec<OnMeshPrefix>,
    external_routes: Vec<ExternalRoute>,
    channel_max_powers: Vec<ChannelMaxPower>,
    ephemeral_key: Option<String>,
    forwarded_datagrams: Vec<ForwardedDatagram>,
}

impl SimulatedInstance {
    pub fn new(config: &InstanceConfig) -> Self {
        SimulatedInstance::with_settings(config, Rc::new(RefCell::new(SimSettings::default())))
    }

    /// Builds an instance over an existing settings blob, used to model the
    /// persisted storage surviving instance re-initialisation.
    pub fn with_settings(config: &InstanceConfig, settings: Rc<RefCell<SimSettings>>) -> Self {
        SimulatedInstance {
            config: config.clone(),
            settings,
            started_at: Instant::now(),
            role: DeviceRole::Disabled,
            ip6_enabled: false,
            thread_enabled: false,
            events: VecDeque::new(),
            timers: Vec::new(),
            ext_address: thread_rng().gen(),
            link_mode: LinkModeConfig {
                rx_on_when_idle: true,
                device_type: true,
                network_data: true,
            },
            mesh_local_prefix_override: None,
            nat64_enabled: false,
            nat64_cidr: None,
            trel_enabled: false,
            srp_enabled: false,
            srp_hosts: Vec::new(),
            srp_responses: Vec::new(),
            on_mesh_prefixes: Vec::new(),
            external_routes: Vec::new(),
            channel_max_powers: Vec::new(),
            ephemeral_key: None,
            forwarded_datagrams: Vec::new(),
        }
    }

    pub fn settings(&self) -> Rc<RefCell<SimSettings>> {
        self.settings.clone()
    }

    /// Test hook: feeds one SRP update through the advertising path.
    pub fn push_srp_update(&mut self, update: SrpUpdate) {
        self.srp_hosts.retain(|h| h.host_name != update.host.host_name);
        self.srp_hosts.push(update.host.clone());
        self.events.push_back(Event::SrpServerUpdate(update));
    }

    /// Test hook: SRP transaction results delivered so far.
    pub fn srp_responses(&self) -> &[(SrpUpdateId, Result<()>)] {
        &self.srp_responses
    }

    /// Test hook: datagrams injected into the stack by the UDP proxy path.
    pub fn forwarded_datagrams(&self) -> &[ForwardedDatagram] {
        &self.forwarded_datagrams
    }

    /// Test hook: asks the stack to emit one datagram toward a host peer.
    pub fn send_udp_to_peer(
        &mut self,
        payload: Vec<u8>,
        peer_addr: Ipv6Addr,
        peer_port: u16,
        thread_port: u16,
    ) {
        self.events.push_back(Event::UdpForwardSend {
            payload,
            peer_addr,
            peer_port,
            thread_port,
        });
    }

    fn schedule(&mut self, delay: Duration, op: PendingOp) {
        self.timers.push((Instant::now() + delay, op));
    }

    fn cancel_attach_timer(&mut self) {
        self.timers
            .retain(|(_, op)| !matches!(op, PendingOp::BecomeLeader));
    }

    fn set_role(&mut self, role: DeviceRole) {
        if self.role != role {
            debug!("Simulated device role: {} -> {role}", self.role);
            self.role = role;
            self.events
                .push_back(Event::StateChanged(ChangedFlags::THREAD_ROLE));
        }
    }

    fn active_dataset(&self) -> Option<OperationalDataset> {
        let settings = self.settings.borrow();
        settings
            .active_dataset
            .as_ref()
            .and_then(|tlvs| OperationalDataset::from_tlvs(tlvs).ok())
    }

    fn fire(&mut self, op: PendingOp) {
        match op {
            PendingOp::BecomeLeader => {
                if self.thread_enabled && self.role == DeviceRole::Detached {
                    self.set_role(DeviceRole::Leader);
                }
            }
            PendingOp::FinishDetach => {
                self.thread_enabled = false;
                self.set_role(DeviceRole::Disabled);
                self.events.push_back(Event::DetachGracefullyDone);
            }
            PendingOp::FinishScan => {
                let results = vec![
                    ActiveScanResult {
                        ext_address: 0x1122_3344_5566_7788,
                        network_name: "OpenThread".to_owned(),
                        ext_pan_id: 0xdead_00be_ef00_cafe,
                        steering_data: vec![0xff],
                        pan_id: 0x1234,
                        joiner_udp_port: 1000,
                        channel: 15,
                        rssi: -40,
                        lqi: 200,
                        version: 4,
                        is_native: false,
                        is_joinable: true,
                    },
                    ActiveScanResult {
                        ext_address: 0x8877_6655_4433_2211,
                        network_name: "OpenThread-guest".to_owned(),
                        ext_pan_id: 0x0102_0304_0506_0708,
                        steering_data: Vec::new(),
                        pan_id: 0x5678,
                        joiner_udp_port: 1001,
                        channel: 20,
                        rssi: -70,
                        lqi: 80,
                        version: 4,
                        is_native: false,
                        is_joinable: false,
                    },
                ];
                self.events.push_back(Event::ScanDone(Ok(results)));
            }
            PendingOp::FinishEnergyScan { channel_mask } => {
                let mut results = Vec::new();
                for channel in 11u8..=26 {
                    if channel_mask == 0 || (channel_mask & (1 << channel)) != 0 {
                        results.push(EnergyScanResult {
                            channel,
                            max_rssi: -90 + channel as i8,
                        });
                    }
                }
                self.events.push_back(Event::EnergyScanDone(Ok(results)));
            }
            PendingOp::FinishJoiner => {
                // A successful joiner session leaves a provisioned dataset
                // behind but does not start the stack.
                match self
                    .create_new_network_dataset()
                    .and_then(|dataset| dataset.to_tlvs())
                {
                    Ok(tlvs) => {
                        self.settings.borrow_mut().active_dataset = Some(tlvs);
                        self.events
                            .push_back(Event::StateChanged(ChangedFlags::ACTIVE_DATASET));
                        self.events.push_back(Event::JoinerDone(Ok(())));
                    }
                    Err(err) => self.events.push_back(Event::JoinerDone(Err(err))),
                }
            }
            PendingOp::FinishMgmtPendingSet { dataset } => {
                self.settings.borrow_mut().pending_dataset = Some(dataset);
                self.events
                    .push_back(Event::StateChanged(ChangedFlags::PENDING_DATASET));
                self.events.push_back(Event::MgmtPendingSetDone(Ok(())));
            }
            PendingOp::ExpireEphemeralKey => {
                if self.ephemeral_key.take().is_some() {
                    info!("Simulated ephemeral key expired");
                }
            }
        }
    }
}

impl InstanceInterface for SimulatedInstance {
    fn update(&mut self, context: &mut MainloopContext) {
        if !self.events.is_empty() {
            context.set_timeout_if_earlier(Duration::from_millis(0));
            return;
        }
        let now = Instant::now();
        if let Some(deadline) = self.timers.iter().map(|(deadline, _)| *deadline).min() {
            context.set_timeout_if_earlier(deadline.saturating_duration_since(now));
        }
    }

    fn process(&mut self, _context: &MainloopContext) {
        let now = Instant::now();
        loop {
            let position = self
                .timers
                .iter()
                .position(|(deadline, _)| *deadline <= now);
            match position {
                Some(position) => {
                    let (_, op) = self.timers.remove(position);
                    self.fire(op);
                }
                None => break,
            }
        }
    }

    fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn reset(&mut self) -> Result<()> {
        info!("Resetting simulated instance");
        self.role = DeviceRole::Disabled;
        self.ip6_enabled = false;
        self.thread_enabled = false;
        self.timers.clear();
        self.events.clear();
        self.ephemeral_key = None;
        Ok(())
    }

    fn erase_persistent_info(&mut self) -> Result<()> {
        if self.thread_enabled {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "Cannot erase persistent info while Thread is enabled",
            ));
        }
        let mut settings = self.settings.borrow_mut();
        settings.active_dataset = None;
        settings.pending_dataset = None;
        Ok(())
    }

    fn ip6_is_enabled(&self) -> bool {
        self.ip6_enabled
    }

    fn ip6_set_enabled(&mut self, enabled: bool) -> Result<()> {
        self.ip6_enabled = enabled;
        if !enabled && self.thread_enabled {
            self.thread_enabled = false;
            self.cancel_attach_timer();
            self.set_role(DeviceRole::Disabled);
        }
        Ok(())
    }

    fn thread_set_enabled(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            if !self.ip6_enabled {
                return Err(Error::new(ErrorKind::InvalidState, "IPv6 interface is down"));
            }
            if self.thread_enabled {
                return Ok(());
            }
            self.thread_enabled = true;
            self.set_role(DeviceRole::Detached);
            if self.settings.borrow().active_dataset.is_some() {
                self.schedule(ATTACH_DELAY, PendingOp::BecomeLeader);
            }
        } else {
            self.thread_enabled = false;
            self.cancel_attach_timer();
            self.set_role(DeviceRole::Disabled);
        }
        Ok(())
    }

    fn detach_gracefully(&mut self) -> Result<()> {
        if self.role == DeviceRole::Disabled {
            self.events.push_back(Event::DetachGracefullyDone);
        } else {
            self.cancel_attach_timer();
            self.set_role(DeviceRole::Detached);
            self.schedule(DETACH_DELAY, PendingOp::FinishDetach);
        }
        Ok(())
    }

    fn device_role(&self) -> DeviceRole {
        self.role
    }

    fn active_dataset_tlvs(&self) -> Option<DatasetTlvs> {
        self.settings.borrow().active_dataset.clone()
    }

    fn pending_dataset_tlvs(&self) -> Option<DatasetTlvs> {
        self.settings.borrow().pending_dataset.clone()
    }

    fn set_active_dataset_tlvs(&mut self, dataset: &DatasetTlvs) -> Result<()> {
        // Reject TLV blobs that do not parse as a dataset.
        OperationalDataset::from_tlvs(dataset)?;
        self.settings.borrow_mut().active_dataset = Some(dataset.clone());
        self.events
            .push_back(Event::StateChanged(ChangedFlags::ACTIVE_DATASET));
        Ok(())
    }

    fn create_new_network_dataset(&self) -> Result<OperationalDataset> {
        let mut rng = thread_rng();

        let mut network_key = [0u8; 16];
        rng.fill(&mut network_key[..]);
        let mut pskc = [0u8; 16];
        rng.fill(&mut pskc[..]);
        let mut ext_pan_id = [0u8; 8];
        rng.fill(&mut ext_pan_id[..]);

        let mut mesh_local_prefix = [0u8; 8];
        rng.fill(&mut mesh_local_prefix[..]);
        mesh_local_prefix[0] = 0xfd;

        let pan_id = loop {
            let candidate: u16 = rng.gen();
            if candidate != 0xffff {
                break candidate;
            }
        };

        Ok(OperationalDataset {
            active_timestamp: Some(1),
            pending_timestamp: None,
            network_key: Some(network_key),
            network_name: Some(format!("OpenThread-{pan_id:04x}")),
            ext_pan_id: Some(ext_pan_id),
            mesh_local_prefix: Some(mesh_local_prefix),
            delay_ms: None,
            pan_id: Some(pan_id),
            channel: Some(rng.gen_range(11..=26)),
            channel_mask: Some(SUPPORTED_CHANNEL_MASK),
            pskc: Some(pskc),
            security_policy: Some(Default::default()),
        })
    }

    fn send_mgmt_pending_set(&mut self, dataset: &DatasetTlvs) -> Result<()> {
        OperationalDataset::from_tlvs(dataset)?;
        self.schedule(
            ATTACH_DELAY,
            PendingOp::FinishMgmtPendingSet {
                dataset: dataset.clone(),
            },
        );
        Ok(())
    }

    fn active_scan(&mut self, _channel_mask: u32, _duration: Duration) -> Result<()> {
        self.schedule(SCAN_DURATION, PendingOp::FinishScan);
        Ok(())
    }

    fn energy_scan(&mut self, channel_mask: u32, _duration: Duration) -> Result<()> {
        self.schedule(SCAN_DURATION, PendingOp::FinishEnergyScan { channel_mask });
        Ok(())
    }

    fn joiner_start(&mut self, info: &JoinerStartInfo) -> Result<()> {
        if !self.ip6_enabled {
            return Err(Error::new(ErrorKind::InvalidState, "IPv6 interface is down"));
        }
        if self.role.is_attached() {
            return Err(Error::new(ErrorKind::InvalidState, "Already attached"));
        }
        if info.pskd.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgs, "Empty joiner PSKd"));
        }
        self.schedule(JOINER_DURATION, PendingOp::FinishJoiner);
        Ok(())
    }

    fn joiner_stop(&mut self) {
        self.timers
            .retain(|(_, op)| !matches!(op, PendingOp::FinishJoiner));
    }

    fn network_name(&self) -> String {
        self.active_dataset()
            .and_then(|dataset| dataset.network_name)
            .unwrap_or_default()
    }

    fn pan_id(&self) -> u16 {
        self.active_dataset()
            .and_then(|dataset| dataset.pan_id)
            .unwrap_or(0xffff)
    }

    fn ext_pan_id(&self) -> u64 {
        self.active_dataset()
            .and_then(|dataset| dataset.ext_pan_id)
            .map(u64::from_be_bytes)
            .unwrap_or(0)
    }

    fn channel(&self) -> u8 {
        self.active_dataset()
            .and_then(|dataset| dataset.channel)
            .unwrap_or(0) as u8
    }

    fn network_key(&self) -> Vec<u8> {
        self.active_dataset()
            .and_then(|dataset| dataset.network_key)
            .map(|key| key.to_vec())
            .unwrap_or_else(|| vec![0u8; 16])
    }

    fn rloc16(&self) -> u16 {
        match self.role {
            DeviceRole::Leader => 0x0400,
            DeviceRole::Router => 0x0800,
            DeviceRole::Child => 0x0801,
            _ => 0xfffe,
        }
    }

    fn extended_address(&self) -> u64 {
        self.ext_address
    }

    fn partition_id(&self) -> u32 {
        if self.role.is_attached() {
            1
        } else {
            0
        }
    }

    fn leader_data(&self) -> LeaderData {
        LeaderData {
            partition_id: self.partition_id(),
            weighting: 64,
            data_version: 1,
            stable_data_version: 1,
            leader_router_id: 1,
        }
    }

    fn link_mode(&self) -> LinkModeConfig {
        self.link_mode
    }

    fn set_link_mode(&mut self, mode: LinkModeConfig) -> Result<()> {
        self.link_mode = mode;
        Ok(())
    }

    fn mesh_local_prefix(&self) -> [u8; 8] {
        self.mesh_local_prefix_override.unwrap_or_else(|| {
            self.active_dataset()
                .and_then(|dataset| dataset.mesh_local_prefix)
                .unwrap_or([0xfd, 0, 0, 0, 0, 0, 0, 0])
        })
    }

    fn set_mesh_local_prefix(&mut self, prefix: [u8; 8]) -> Result<()> {
        self.mesh_local_prefix_override = Some(prefix);
        Ok(())
    }

    #[cfg(feature = "legacy-ula-prefix")]
    fn set_legacy_ula_prefix(&mut self, prefix: [u8; 8]) -> Result<()> {
        self.mesh_local_prefix_override = Some(prefix);
        Ok(())
    }

    fn link_counters(&self) -> MacCounters {
        MacCounters::default()
    }

    fn ip6_counters(&self) -> IpCounters {
        IpCounters::default()
    }

    fn supported_channel_mask(&self) -> u32 {
        SUPPORTED_CHANNEL_MASK
    }

    fn preferred_channel_mask(&self) -> u32 {
        SUPPORTED_CHANNEL_MASK
    }

    fn network_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn stable_network_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn thread_version(&self) -> u16 {
        // Thread 1.3.
        4
    }

    fn host_version(&self) -> String {
        "SIMULATED/1.3.0".to_owned()
    }

    fn rcp_version(&self) -> String {
        format!("SIMULATED-RCP/1.3.0 ({})", self.config.interface_name)
    }

    fn add_on_mesh_prefix(&mut self, prefix: &OnMeshPrefix) -> Result<()> {
        self.on_mesh_prefixes
            .retain(|existing| existing.prefix != prefix.prefix);
        self.on_mesh_prefixes.push(prefix.clone());
        self.events
            .push_back(Event::StateChanged(ChangedFlags::THREAD_NETDATA));
        Ok(())
    }

    fn remove_on_mesh_prefix(&mut self, prefix: &Ip6Prefix) -> Result<()> {
        let before = self.on_mesh_prefixes.len();
        self.on_mesh_prefixes
            .retain(|existing| existing.prefix != *prefix);
        if self.on_mesh_prefixes.len() == before {
            return Err(Error::new(ErrorKind::NotFound, "No such on-mesh prefix"));
        }
        self.events
            .push_back(Event::StateChanged(ChangedFlags::THREAD_NETDATA));
        Ok(())
    }

    fn on_mesh_prefixes(&self) -> Vec<OnMeshPrefix> {
        self.on_mesh_prefixes.clone()
    }

    fn add_external_route(&mut self, route: &ExternalRoute) -> Result<()> {
        self.external_routes
            .retain(|existing| existing.prefix != route.prefix);
        self.external_routes.push(route.clone());
        self.events
            .push_back(Event::StateChanged(ChangedFlags::THREAD_NETDATA));
        Ok(())
    }

    fn remove_external_route(&mut self, prefix: &Ip6Prefix) -> Result<()> {
        let before = self.external_routes.len();
        self.external_routes
            .retain(|existing| existing.prefix != *prefix);
        if self.external_routes.len() == before {
            return Err(Error::new(ErrorKind::NotFound, "No such external route"));
        }
        self.events
            .push_back(Event::StateChanged(ChangedFlags::THREAD_NETDATA));
        Ok(())
    }

    fn external_routes(&self) -> Vec<ExternalRoute> {
        self.external_routes.clone()
    }

    fn set_region(&mut self, _region: &str) -> Result<()> {
        // The platform radio has no regulatory support compiled in.
        Err(Error::new(ErrorKind::NotImplemented, "Region setting not supported"))
    }

    fn region(&self) -> Option<String> {
        None
    }

    fn set_channel_max_power(&mut self, power: ChannelMaxPower) -> Result<()> {
        self.channel_max_powers
            .retain(|existing| existing.channel != power.channel);
        self.channel_max_powers.push(power);
        Ok(())
    }

    fn nat64_set_enabled(&mut self, enabled: bool) {
        self.nat64_enabled = enabled;
    }

    fn nat64_state(&self) -> Nat64State {
        if !self.nat64_enabled {
            Nat64State::Disabled
        } else if self.role.is_attached() {
            Nat64State::Active
        } else {
            Nat64State::NotRunning
        }
    }

    fn nat64_cidr(&self) -> Option<String> {
        self.nat64_cidr.clone()
    }

    fn set_nat64_cidr(&mut self, cidr: &str) -> Result<()> {
        if !cidr.contains('/') {
            return Err(Error::new(ErrorKind::InvalidArgs, "Bad NAT64 CIDR"));
        }
        self.nat64_cidr = Some(cidr.to_owned());
        Ok(())
    }

    fn nat64_mappings(&self) -> Vec<Nat64Mapping> {
        Vec::new()
    }

    fn trel_set_enabled(&mut self, enabled: bool) {
        self.trel_enabled = enabled;
    }

    fn trel_info(&self) -> TrelInfo {
        TrelInfo {
            enabled: self.trel_enabled,
            ..TrelInfo::default()
        }
    }

    fn dnssd_counters(&self) -> DnssdCounters {
        DnssdCounters::default()
    }

    fn border_routing_counters(&self) -> BorderRoutingCounters {
        BorderRoutingCounters::default()
    }

    fn capabilities(&self) -> Vec<u8> {
        Vec::new()
    }

    fn telemetry_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn srp_server_set_enabled(&mut self, enabled: bool) {
        self.srp_enabled = enabled;
    }

    fn srp_server_info(&self) -> SrpServerInfo {
        let fresh_hosts = self.srp_hosts.iter().filter(|h| !h.deleted).count() as u32;
        let deleted_hosts = self.srp_hosts.len() as u32 - fresh_hosts;
        let fresh_services = self
            .srp_hosts
            .iter()
            .flat_map(|h| h.services.iter())
            .filter(|s| !s.deleted)
            .count() as u32;
        let deleted_services = self
            .srp_hosts
            .iter()
            .flat_map(|h| h.services.iter())
            .count() as u32
            - fresh_services;

        SrpServerInfo {
            state: if self.srp_enabled {
                SrpServerState::Running
            } else {
                SrpServerState::Disabled
            },
            port: if self.srp_enabled { 53535 } else { 0 },
            fresh_hosts,
            deleted_hosts,
            fresh_services,
            deleted_services,
            response_counters: Default::default(),
        }
    }

    fn srp_server_hosts(&self) -> Vec<SrpHost> {
        self.srp_hosts.clone()
    }

    fn srp_server_respond(&mut self, id: SrpUpdateId, result: Result<()>) {
        debug!("SRP update {id} finished: {result:?}");
        self.srp_responses.push((id, result));
    }

    fn border_agent_is_active(&self) -> bool {
        self.role.is_attached()
    }

    fn border_agent_udp_port(&self) -> u16 {
        SIM_BORDER_AGENT_PORT
    }

    fn activate_ephemeral_key_mode(&mut self, lifetime: Duration) -> Result<String> {
        if self.ephemeral_key.is_some() {
            return Err(Error::new(ErrorKind::Already, "Ephemeral key already active"));
        }
        let key = format!("{:09}", thread_rng().gen_range(0..1_000_000_000u32));
        self.ephemeral_key = Some(key.clone());
        self.schedule(lifetime, PendingOp::ExpireEphemeralKey);
        Ok(key)
    }

    fn deactivate_ephemeral_key_mode(&mut self) -> Result<()> {
        self.ephemeral_key = None;
        self.timers
            .retain(|(_, op)| !matches!(op, PendingOp::ExpireEphemeralKey));
        Ok(())
    }

    fn ephemeral_key_enabled(&self) -> bool {
        self.ephemeral_key.is_some()
    }

    fn udp_forward_receive(
        &mut self,
        payload: &[u8],
        peer_addr: Ipv6Addr,
        peer_port: u16,
        local_port: u16,
    ) {
        self.forwarded_datagrams.push(ForwardedDatagram {
            payload: payload.to_vec(),
            peer_addr,
            peer_port,
            local_port,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InstanceConfig {
        InstanceConfig {
            interface_name: "wpan0".to_owned(),
            radio_urls: Vec::new(),
            backbone_interface_name: None,
            dry_run: true,
        }
    }

    fn pump(instance: &mut SimulatedInstance, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            let context = MainloopContext::new(Duration::from_millis(1));
            instance.process(&context);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_attach_requires_dataset() {
        let mut instance = SimulatedInstance::new(&config());
        instance.ip6_set_enabled(true).unwrap();
        instance.thread_set_enabled(true).unwrap();

        pump(&mut instance, Duration::from_millis(30));
        assert_eq!(instance.device_role(), DeviceRole::Detached);
    }

    #[test]
    fn test_attach_with_dataset_becomes_leader() {
        let mut instance = SimulatedInstance::new(&config());
        let tlvs = instance
            .create_new_network_dataset()
            .unwrap()
            .to_tlvs()
            .unwrap();
        instance.set_active_dataset_tlvs(&tlvs).unwrap();
        instance.ip6_set_enabled(true).unwrap();
        instance.thread_set_enabled(true).unwrap();

        pump(&mut instance, Duration::from_millis(50));
        assert_eq!(instance.device_role(), DeviceRole::Leader);
    }

    #[test]
    fn test_detach_gracefully_reports_done() {
        let mut instance = SimulatedInstance::new(&config());
        let tlvs = instance
            .create_new_network_dataset()
            .unwrap()
            .to_tlvs()
            .unwrap();
        instance.set_active_dataset_tlvs(&tlvs).unwrap();
        instance.ip6_set_enabled(true).unwrap();
        instance.thread_set_enabled(true).unwrap();
        pump(&mut instance, Duration::from_millis(50));

        instance.detach_gracefully().unwrap();
        pump(&mut instance, Duration::from_millis(50));

        assert_eq!(instance.device_role(), DeviceRole::Disabled);
        let mut saw_done = false;
        while let Some(event) = instance.poll_event() {
            if matches!(event, Event::DetachGracefullyDone) {
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[test]
    fn test_settings_survive_reset_but_not_erase() {
        let mut instance = SimulatedInstance::new(&config());
        let tlvs = instance
            .create_new_network_dataset()
            .unwrap()
            .to_tlvs()
            .unwrap();
        instance.set_active_dataset_tlvs(&tlvs).unwrap();

        instance.reset().unwrap();
        assert!(instance.active_dataset_tlvs().is_some());

        instance.erase_persistent_info().unwrap();
        assert!(instance.active_dataset_tlvs().is_none());
    }
}
