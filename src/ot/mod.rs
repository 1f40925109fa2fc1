//! Interface consumed from the Thread stack.
//!
//! The stack itself is an external collaborator; this module defines the
//! capability surface the agent drives ([`InstanceInterface`]), the data
//! types crossing it, and a deterministic in-process implementation
//! ([`sim::SimulatedInstance`]) used for dry-run operation and tests.

pub mod dataset;
pub mod sim;
pub mod srp;

use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::MainloopContext;

pub use dataset::{DatasetTlvs, OperationalDataset};

/// Upper bound on configured radio URLs.
pub const MAX_RADIO_URLS: usize = 2;

/// Thread device role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

impl DeviceRole {
    pub fn is_attached(self) -> bool {
        matches!(self, DeviceRole::Child | DeviceRole::Router | DeviceRole::Leader)
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceRole::Disabled => "disabled",
            DeviceRole::Detached => "detached",
            DeviceRole::Child => "child",
            DeviceRole::Router => "router",
            DeviceRole::Leader => "leader",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// State-changed flags reported by the stack.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChangedFlags: u32 {
        const IP6_ADDRESS_ADDED        = 1 << 0;
        const IP6_ADDRESS_REMOVED      = 1 << 1;
        const THREAD_ROLE              = 1 << 2;
        const THREAD_PARTITION_ID      = 1 << 7;
        const THREAD_NETDATA           = 1 << 9;
        const THREAD_CHANNEL           = 1 << 14;
        const THREAD_PANID             = 1 << 15;
        const THREAD_NETWORK_NAME      = 1 << 16;
        const THREAD_EXT_PANID         = 1 << 17;
        const NETWORK_KEY              = 1 << 18;
        const PSKC                     = 1 << 19;
        const ACTIVE_DATASET           = 1 << 23;
        const PENDING_DATASET          = 1 << 24;
    }
}

/// Parsed `scheme://device?key=value&flag` radio URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioUrl {
    pub scheme: String,
    pub device: String,
    pub parameters: Vec<(String, Option<String>)>,
}

impl RadioUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgs, format!("Bad radio URL \"{url}\"")))?;
        if scheme.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgs, format!("Bad radio URL \"{url}\"")));
        }

        let (device, query) = match rest.split_once('?') {
            Some((device, query)) => (device, Some(query)),
            None => (rest, None),
        };

        let mut parameters = Vec::new();
        if let Some(query) = query {
            for part in query.split('&').filter(|part| !part.is_empty()) {
                match part.split_once('=') {
                    Some((key, value)) => {
                        parameters.push((key.to_owned(), Some(value.to_owned())))
                    }
                    None => parameters.push((part.to_owned(), None)),
                }
            }
        }

        Ok(RadioUrl {
            scheme: scheme.to_owned(),
            device: device.to_owned(),
            parameters,
        })
    }
}

/// Configuration used to bring up a stack instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Network interface to bring up for Thread IPv6.
    pub interface_name: String,
    /// RCP transports, at most [`MAX_RADIO_URLS`].
    pub radio_urls: Vec<String>,
    pub backbone_interface_name: Option<String>,
    pub dry_run: bool,
}

impl InstanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.radio_urls.len() > MAX_RADIO_URLS {
            return Err(Error::new(ErrorKind::InvalidArgs, "Too many radio URLs"));
        }
        for url in &self.radio_urls {
            RadioUrl::parse(url)?;
        }
        Ok(())
    }
}

/// Arguments to start a joiner.
#[derive(Debug, Clone, Default)]
pub struct JoinerStartInfo {
    pub pskd: String,
    pub provisioning_url: String,
    pub vendor_name: String,
    pub vendor_model: String,
    pub vendor_sw_version: String,
    pub vendor_data: String,
}

/// One 802.15.4 active-scan result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveScanResult {
    pub ext_address: u64,
    pub network_name: String,
    pub ext_pan_id: u64,
    pub steering_data: Vec<u8>,
    pub pan_id: u16,
    pub joiner_udp_port: u16,
    pub channel: u8,
    pub rssi: i8,
    pub lqi: u8,
    pub version: u8,
    pub is_native: bool,
    pub is_joinable: bool,
}

/// Per-channel maximum RSSI seen during an energy scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyScanResult {
    pub channel: u8,
    pub max_rssi: i8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkModeConfig {
    pub rx_on_when_idle: bool,
    pub device_type: bool,
    pub network_data: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaderData {
    pub partition_id: u32,
    pub weighting: u8,
    pub data_version: u8,
    pub stable_data_version: u8,
    pub leader_router_id: u8,
}

/// 802.15.4 MAC layer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacCounters {
    pub tx_total: u32,
    pub tx_unicast: u32,
    pub tx_broadcast: u32,
    pub tx_ack_requested: u32,
    pub tx_acked: u32,
    pub tx_no_ack_requested: u32,
    pub tx_data: u32,
    pub tx_data_poll: u32,
    pub tx_beacon: u32,
    pub tx_beacon_request: u32,
    pub tx_other: u32,
    pub tx_retry: u32,
    pub tx_err_cca: u32,
    pub tx_err_abort: u32,
    pub tx_err_busy_channel: u32,
    pub rx_total: u32,
    pub rx_unicast: u32,
    pub rx_broadcast: u32,
    pub rx_data: u32,
    pub rx_data_poll: u32,
    pub rx_beacon: u32,
    pub rx_beacon_request: u32,
    pub rx_other: u32,
    pub rx_address_filtered: u32,
    pub rx_dest_addr_filtered: u32,
    pub rx_duplicated: u32,
    pub rx_err_no_frame: u32,
    pub rx_err_unknown_neighbor: u32,
    pub rx_err_invalid_src_addr: u32,
    pub rx_err_sec: u32,
    pub rx_err_fcs: u32,
    pub rx_err_other: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpCounters {
    pub tx_success: u32,
    pub rx_success: u32,
    pub tx_failure: u32,
    pub rx_failure: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelMaxPower {
    pub channel: u8,
    /// Maximum transmit power, in dBm.
    pub max_power: i16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ip6Prefix {
    pub prefix: Vec<u8>,
    pub length: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnMeshPrefix {
    pub prefix: Ip6Prefix,
    pub preference: i8,
    pub preferred: bool,
    pub slaac: bool,
    pub dhcp: bool,
    pub configure: bool,
    pub default_route: bool,
    pub on_mesh: bool,
    pub stable: bool,
    pub nd_dns: bool,
    pub dp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalRoute {
    pub prefix: Ip6Prefix,
    pub rloc16: u16,
    pub preference: i8,
    pub stable: bool,
    pub next_hop_is_this_device: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nat64State {
    Disabled,
    NotRunning,
    Idle,
    Active,
}

impl Nat64State {
    pub fn name(self) -> &'static str {
        match self {
            Nat64State::Disabled => "disabled",
            Nat64State::NotRunning => "not_running",
            Nat64State::Idle => "idle",
            Nat64State::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nat64Mapping {
    pub mapping_id: u64,
    pub ip4_address: String,
    pub ip6_address: String,
    pub remaining_time_ms: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SrpServerResponseCounters {
    pub success: u32,
    pub server_failure: u32,
    pub format_error: u32,
    pub name_exists: u32,
    pub refused: u32,
    pub other: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpServerState {
    Disabled,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrpServerInfo {
    pub state: SrpServerState,
    pub port: u16,
    pub fresh_hosts: u32,
    pub deleted_hosts: u32,
    pub fresh_services: u32,
    pub deleted_services: u32,
    pub response_counters: SrpServerResponseCounters,
}

impl Default for SrpServerInfo {
    fn default() -> Self {
        SrpServerInfo {
            state: SrpServerState::Disabled,
            port: 0,
            fresh_hosts: 0,
            deleted_hosts: 0,
            fresh_services: 0,
            deleted_services: 0,
            response_counters: SrpServerResponseCounters::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnssdCounters {
    pub success_response: u32,
    pub server_failure_response: u32,
    pub format_error_response: u32,
    pub name_error_response: u32,
    pub not_implemented_response: u32,
    pub other_response: u32,
    pub resolved_by_srp: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrelInfo {
    pub enabled: bool,
    pub num_trel_peers: u16,
    pub trel_tx_packets: u64,
    pub trel_tx_bytes: u64,
    pub trel_rx_packets: u64,
    pub trel_rx_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketsAndBytes {
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorderRoutingCounters {
    pub inbound_unicast: PacketsAndBytes,
    pub inbound_multicast: PacketsAndBytes,
    pub outbound_unicast: PacketsAndBytes,
    pub outbound_multicast: PacketsAndBytes,
    pub ra_rx: u32,
    pub ra_tx_success: u32,
    pub ra_tx_failure: u32,
    pub rs_rx: u32,
    pub rs_tx_success: u32,
    pub rs_tx_failure: u32,
}

/// Identifier of one SRP server update transaction.
pub type SrpUpdateId = u32;

/// Completions and unsolicited notifications from the stack.
///
/// Events are polled by the host after each `process` pass so they are always
/// handled with no stack borrows outstanding.
pub enum Event {
    StateChanged(ChangedFlags),
    DetachGracefullyDone,
    ScanDone(Result<Vec<ActiveScanResult>>),
    EnergyScanDone(Result<Vec<EnergyScanResult>>),
    MgmtPendingSetDone(Result<()>),
    JoinerDone(Result<()>),
    SrpServerUpdate(srp::SrpUpdate),
    /// Datagram the stack wants delivered to a host-side UDP peer.
    UdpForwardSend {
        payload: Vec<u8>,
        peer_addr: Ipv6Addr,
        peer_port: u16,
        thread_port: u16,
    },
}

/// The operations the agent drives on a stack instance.
///
/// Mutating entry points return `InvalidState`/`InvalidArgs` style errors the
/// way the stack reports them; asynchronous operations complete through
/// [`Event`]s.
pub trait InstanceInterface {
    // Mainloop integration.
    fn update(&mut self, context: &mut MainloopContext);
    fn process(&mut self, context: &MainloopContext);
    fn poll_event(&mut self) -> Option<Event>;

    // Lifecycle.
    fn reset(&mut self) -> Result<()>;
    fn erase_persistent_info(&mut self) -> Result<()>;

    // Link and stack control.
    fn ip6_is_enabled(&self) -> bool;
    fn ip6_set_enabled(&mut self, enabled: bool) -> Result<()>;
    fn thread_set_enabled(&mut self, enabled: bool) -> Result<()>;
    fn detach_gracefully(&mut self) -> Result<()>;
    fn device_role(&self) -> DeviceRole;

    // Datasets.
    fn active_dataset_tlvs(&self) -> Option<DatasetTlvs>;
    fn pending_dataset_tlvs(&self) -> Option<DatasetTlvs>;
    fn set_active_dataset_tlvs(&mut self, dataset: &DatasetTlvs) -> Result<()>;
    fn create_new_network_dataset(&self) -> Result<OperationalDataset>;
    fn send_mgmt_pending_set(&mut self, dataset: &DatasetTlvs) -> Result<()>;

    // Scanning and joining.
    fn active_scan(&mut self, channel_mask: u32, duration: Duration) -> Result<()>;
    fn energy_scan(&mut self, channel_mask: u32, duration: Duration) -> Result<()>;
    fn joiner_start(&mut self, info: &JoinerStartInfo) -> Result<()>;
    fn joiner_stop(&mut self);

    // Network properties.
    fn network_name(&self) -> String;
    fn pan_id(&self) -> u16;
    fn ext_pan_id(&self) -> u64;
    fn channel(&self) -> u8;
    fn network_key(&self) -> Vec<u8>;
    fn rloc16(&self) -> u16;
    fn extended_address(&self) -> u64;
    fn partition_id(&self) -> u32;
    fn leader_data(&self) -> LeaderData;
    fn link_mode(&self) -> LinkModeConfig;
    fn set_link_mode(&mut self, mode: LinkModeConfig) -> Result<()>;
    fn mesh_local_prefix(&self) -> [u8; 8];
    fn set_mesh_local_prefix(&mut self, prefix: [u8; 8]) -> Result<()>;
    #[cfg(feature = "legacy-ula-prefix")]
    fn set_legacy_ula_prefix(&mut self, prefix: [u8; 8]) -> Result<()>;
    fn link_counters(&self) -> MacCounters;
    fn ip6_counters(&self) -> IpCounters;
    fn supported_channel_mask(&self) -> u32;
    fn preferred_channel_mask(&self) -> u32;
    fn network_data(&self) -> Vec<u8>;
    fn stable_network_data(&self) -> Vec<u8>;
    fn uptime_ms(&self) -> u64;
    fn thread_version(&self) -> u16;
    fn host_version(&self) -> String;
    fn rcp_version(&self) -> String;

    // Network data edits.
    fn add_on_mesh_prefix(&mut self, prefix: &OnMeshPrefix) -> Result<()>;
    fn remove_on_mesh_prefix(&mut self, prefix: &Ip6Prefix) -> Result<()>;
    fn on_mesh_prefixes(&self) -> Vec<OnMeshPrefix>;
    fn add_external_route(&mut self, route: &ExternalRoute) -> Result<()>;
    fn remove_external_route(&mut self, prefix: &Ip6Prefix) -> Result<()>;
    fn external_routes(&self) -> Vec<ExternalRoute>;

    // Radio and regulatory.
    fn set_region(&mut self, region: &str) -> Result<()>;
    fn region(&self) -> Option<String>;
    fn set_channel_max_power(&mut self, power: ChannelMaxPower) -> Result<()>;

    // Feature blocks.
    fn nat64_set_enabled(&mut self, enabled: bool);
    fn nat64_state(&self) -> Nat64State;
    fn nat64_cidr(&self) -> Option<String>;
    fn set_nat64_cidr(&mut self, cidr: &str) -> Result<()>;
    fn nat64_mappings(&self) -> Vec<Nat64Mapping>;
    fn trel_set_enabled(&mut self, enabled: bool);
    fn trel_info(&self) -> TrelInfo;
    fn dnssd_counters(&self) -> DnssdCounters;
    fn border_routing_counters(&self) -> BorderRoutingCounters;
    fn capabilities(&self) -> Vec<u8>;
    fn telemetry_data(&self) -> Vec<u8>;

    // SRP server.
    fn srp_server_set_enabled(&mut self, enabled: bool);
    fn srp_server_info(&self) -> SrpServerInfo;
    fn srp_server_hosts(&self) -> Vec<srp::SrpHost>;
    fn srp_server_respond(&mut self, id: SrpUpdateId, result: Result<()>);

    // Border agent and ephemeral key.
    fn border_agent_is_active(&self) -> bool;
    fn border_agent_udp_port(&self) -> u16;
    fn activate_ephemeral_key_mode(&mut self, lifetime: Duration) -> Result<String>;
    fn deactivate_ephemeral_key_mode(&mut self) -> Result<()>;
    fn ephemeral_key_enabled(&self) -> bool;

    // Host-to-Thread UDP forwarding.
    fn udp_forward_receive(
        &mut self,
        payload: &[u8],
        peer_addr: Ipv6Addr,
        peer_port: u16,
        local_port: u16,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_url_parse() {
        let url = RadioUrl::parse("spinel+hdlc+uart:///dev/ttyACM0?uart-baudrate=460800&no-reset")
            .unwrap();
        assert_eq!(url.scheme, "spinel+hdlc+uart");
        assert_eq!(url.device, "/dev/ttyACM0");
        assert_eq!(
            url.parameters,
            vec![
                ("uart-baudrate".to_owned(), Some("460800".to_owned())),
                ("no-reset".to_owned(), None),
            ]
        );
    }

    #[test]
    fn test_radio_url_without_scheme_rejected() {
        assert!(RadioUrl::parse("/dev/ttyACM0").is_err());
    }

    #[test]
    fn test_config_rejects_too_many_radio_urls() {
        let config = InstanceConfig {
            interface_name: "wpan0".to_owned(),
            radio_urls: vec![
                "trel://eth0".to_owned(),
                "spinel+hdlc+uart:///dev/a".to_owned(),
                "spinel+hdlc+uart:///dev/b".to_owned(),
            ],
            backbone_interface_name: None,
            dry_run: false,
        };
        assert_eq!(
            config.validate().unwrap_err().kind(),
            ErrorKind::InvalidArgs
        );
    }

    #[test]
    fn test_device_role_names() {
        assert_eq!(DeviceRole::Leader.name(), "leader");
        assert!(DeviceRole::Child.is_attached());
        assert!(!DeviceRole::Detached.is_attached());
    }
}
