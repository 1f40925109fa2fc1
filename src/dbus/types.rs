//! Wire codecs for the structured types crossing the D-Bus surface.

use crate::dbus::value::{as_struct, struct_field, DBusDecode, DBusEncode, Value};
use crate::error::Result;
use crate::net::LinkAddressCounts;
use crate::ot::{
    ActiveScanResult, BorderRoutingCounters, DnssdCounters, EnergyScanResult, ExternalRoute,
    IpCounters, Ip6Prefix, LeaderData, LinkModeConfig, MacCounters, Nat64Mapping,
    PacketsAndBytes, SrpServerInfo, SrpServerState, TrelInfo,
};

impl DBusEncode for ActiveScanResult {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::U64(self.ext_address),
            Value::Str(self.network_name.clone()),
            Value::U64(self.ext_pan_id),
            Value::bytes(&self.steering_data),
            Value::U16(self.pan_id),
            Value::U16(self.joiner_udp_port),
            Value::Byte(self.channel),
            Value::I16(self.rssi as i16),
            Value::Byte(self.lqi),
            Value::Byte(self.version),
            Value::Bool(self.is_native),
            Value::Bool(self.is_joinable),
        ])
    }
}

impl DBusDecode for ActiveScanResult {
    fn decode(value: &Value) -> Result<Self> {
        let fields = as_struct(value)?;
        Ok(ActiveScanResult {
            ext_address: u64::decode(struct_field(fields, 0)?)?,
            network_name: String::decode(struct_field(fields, 1)?)?,
            ext_pan_id: u64::decode(struct_field(fields, 2)?)?,
            steering_data: struct_field(fields, 3)?.as_bytes()?,
            pan_id: u16::decode(struct_field(fields, 4)?)?,
            joiner_udp_port: u16::decode(struct_field(fields, 5)?)?,
            channel: u8::decode(struct_field(fields, 6)?)?,
            rssi: i16::decode(struct_field(fields, 7)?)? as i8,
            lqi: u8::decode(struct_field(fields, 8)?)?,
            version: u8::decode(struct_field(fields, 9)?)?,
            is_native: bool::decode(struct_field(fields, 10)?)?,
            is_joinable: bool::decode(struct_field(fields, 11)?)?,
        })
    }
}

impl DBusEncode for EnergyScanResult {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::Byte(self.channel),
            Value::I16(self.max_rssi as i16),
        ])
    }
}

impl DBusDecode for EnergyScanResult {
    fn decode(value: &Value) -> Result<Self> {
        let fields = as_struct(value)?;
        Ok(EnergyScanResult {
            channel: u8::decode(struct_field(fields, 0)?)?,
            max_rssi: i16::decode(struct_field(fields, 1)?)? as i8,
        })
    }
}

impl DBusEncode for LinkModeConfig {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::Bool(self.rx_on_when_idle),
            Value::Bool(self.device_type),
            Value::Bool(self.network_data),
        ])
    }
}

impl DBusDecode for LinkModeConfig {
    fn decode(value: &Value) -> Result<Self> {
        let fields = as_struct(value)?;
        Ok(LinkModeConfig {
            rx_on_when_idle: bool::decode(struct_field(fields, 0)?)?,
            device_type: bool::decode(struct_field(fields, 1)?)?,
            network_data: bool::decode(struct_field(fields, 2)?)?,
        })
    }
}

impl DBusEncode for LeaderData {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::U32(self.partition_id),
            Value::Byte(self.weighting),
            Value::Byte(self.data_version),
            Value::Byte(self.stable_data_version),
            Value::Byte(self.leader_router_id),
        ])
    }
}

impl DBusEncode for Ip6Prefix {
    fn encode(&self) -> Value {
        Value::Struct(vec![Value::bytes(&self.prefix), Value::Byte(self.length)])
    }
}

impl DBusDecode for Ip6Prefix {
    fn decode(value: &Value) -> Result<Self> {
        let fields = as_struct(value)?;
        Ok(Ip6Prefix {
            prefix: struct_field(fields, 0)?.as_bytes()?,
            length: u8::decode(struct_field(fields, 1)?)?,
        })
    }
}

impl DBusEncode for crate::ot::OnMeshPrefix {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            self.prefix.encode(),
            Value::I16(self.preference as i16),
            Value::Bool(self.preferred),
            Value::Bool(self.slaac),
            Value::Bool(self.dhcp),
            Value::Bool(self.configure),
            Value::Bool(self.default_route),
            Value::Bool(self.on_mesh),
            Value::Bool(self.stable),
            Value::Bool(self.nd_dns),
            Value::Bool(self.dp),
        ])
    }
}

impl DBusDecode for crate::ot::OnMeshPrefix {
    fn decode(value: &Value) -> Result<Self> {
        let fields = as_struct(value)?;
        Ok(crate::ot::OnMeshPrefix {
            prefix: Ip6Prefix::decode(struct_field(fields, 0)?)?,
            preference: i16::decode(struct_field(fields, 1)?)? as i8,
            preferred: bool::decode(struct_field(fields, 2)?)?,
            slaac: bool::decode(struct_field(fields, 3)?)?,
            dhcp: bool::decode(struct_field(fields, 4)?)?,
            configure: bool::decode(struct_field(fields, 5)?)?,
            default_route: bool::decode(struct_field(fields, 6)?)?,
            on_mesh: bool::decode(struct_field(fields, 7)?)?,
            stable: bool::decode(struct_field(fields, 8)?)?,
            nd_dns: bool::decode(struct_field(fields, 9)?)?,
            dp: bool::decode(struct_field(fields, 10)?)?,
        })
    }
}

impl DBusEncode for ExternalRoute {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            self.prefix.encode(),
            Value::U16(self.rloc16),
            Value::I16(self.preference as i16),
            Value::Bool(self.stable),
            Value::Bool(self.next_hop_is_this_device),
        ])
    }
}

impl DBusDecode for ExternalRoute {
    fn decode(value: &Value) -> Result<Self> {
        let fields = as_struct(value)?;
        Ok(ExternalRoute {
            prefix: Ip6Prefix::decode(struct_field(fields, 0)?)?,
            rloc16: u16::decode(struct_field(fields, 1)?)?,
            preference: i16::decode(struct_field(fields, 2)?)? as i8,
            stable: bool::decode(struct_field(fields, 3)?)?,
            next_hop_is_this_device: bool::decode(struct_field(fields, 4)?)?,
        })
    }
}

impl DBusEncode for MacCounters {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::U32(self.tx_total),
            Value::U32(self.tx_unicast),
            Value::U32(self.tx_broadcast),
            Value::U32(self.tx_ack_requested),
            Value::U32(self.tx_acked),
            Value::U32(self.tx_no_ack_requested),
            Value::U32(self.tx_data),
            Value::U32(self.tx_data_poll),
            Value::U32(self.tx_beacon),
            Value::U32(self.tx_beacon_request),
            Value::U32(self.tx_other),
            Value::U32(self.tx_retry),
            Value::U32(self.tx_err_cca),
            Value::U32(self.tx_err_abort),
            Value::U32(self.tx_err_busy_channel),
            Value::U32(self.rx_total),
            Value::U32(self.rx_unicast),
            Value::U32(self.rx_broadcast),
            Value::U32(self.rx_data),
            Value::U32(self.rx_data_poll),
            Value::U32(self.rx_beacon),
            Value::U32(self.rx_beacon_request),
            Value::U32(self.rx_other),
            Value::U32(self.rx_address_filtered),
            Value::U32(self.rx_dest_addr_filtered),
            Value::U32(self.rx_duplicated),
            Value::U32(self.rx_err_no_frame),
            Value::U32(self.rx_err_unknown_neighbor),
            Value::U32(self.rx_err_invalid_src_addr),
            Value::U32(self.rx_err_sec),
            Value::U32(self.rx_err_fcs),
            Value::U32(self.rx_err_other),
        ])
    }
}

impl DBusEncode for IpCounters {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::U32(self.tx_success),
            Value::U32(self.rx_success),
            Value::U32(self.tx_failure),
            Value::U32(self.rx_failure),
        ])
    }
}

impl DBusEncode for SrpServerInfo {
    fn encode(&self) -> Value {
        let state = match self.state {
            SrpServerState::Disabled => 0u8,
            SrpServerState::Running => 1,
            SrpServerState::Stopped => 2,
        };
        Value::Struct(vec![
            Value::Byte(state),
            Value::U16(self.port),
            Value::Struct(vec![
                Value::U32(self.fresh_hosts),
                Value::U32(self.deleted_hosts),
            ]),
            Value::Struct(vec![
                Value::U32(self.fresh_services),
                Value::U32(self.deleted_services),
            ]),
            Value::Struct(vec![
                Value::U32(self.response_counters.success),
                Value::U32(self.response_counters.server_failure),
                Value::U32(self.response_counters.format_error),
                Value::U32(self.response_counters.name_exists),
                Value::U32(self.response_counters.refused),
                Value::U32(self.response_counters.other),
            ]),
        ])
    }
}

impl DBusEncode for DnssdCounters {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::U32(self.success_response),
            Value::U32(self.server_failure_response),
            Value::U32(self.format_error_response),
            Value::U32(self.name_error_response),
            Value::U32(self.not_implemented_response),
            Value::U32(self.other_response),
            Value::U32(self.resolved_by_srp),
        ])
    }
}

impl DBusEncode for TrelInfo {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::Bool(self.enabled),
            Value::U16(self.num_trel_peers),
            Value::U64(self.trel_tx_packets),
            Value::U64(self.trel_tx_bytes),
            Value::U64(self.trel_rx_packets),
            Value::U64(self.trel_rx_bytes),
        ])
    }
}

impl DBusEncode for PacketsAndBytes {
    fn encode(&self) -> Value {
        Value::Struct(vec![Value::U64(self.packets), Value::U64(self.bytes)])
    }
}

impl DBusEncode for BorderRoutingCounters {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            self.inbound_unicast.encode(),
            self.inbound_multicast.encode(),
            self.outbound_unicast.encode(),
            self.outbound_multicast.encode(),
            Value::U32(self.ra_rx),
            Value::U32(self.ra_tx_success),
            Value::U32(self.ra_tx_failure),
            Value::U32(self.rs_rx),
            Value::U32(self.rs_tx_success),
            Value::U32(self.rs_tx_failure),
        ])
    }
}

impl DBusEncode for Nat64Mapping {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::U64(self.mapping_id),
            Value::Str(self.ip4_address.clone()),
            Value::Str(self.ip6_address.clone()),
            Value::U32(self.remaining_time_ms),
        ])
    }
}

/// Snapshot of the infrastructure link published over D-Bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfraLinkInfo {
    pub name: String,
    pub is_up: bool,
    pub address_counts: LinkAddressCounts,
}

impl DBusEncode for InfraLinkInfo {
    fn encode(&self) -> Value {
        Value::Struct(vec![
            Value::Str(self.name.clone()),
            Value::Bool(self.is_up),
            Value::U32(self.address_counts.link_local),
            Value::U32(self.address_counts.unique_local),
            Value::U32(self.address_counts.global_unicast),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_result_round_trip() {
        let result = ActiveScanResult {
            ext_address: 0x1122334455667788,
            network_name: "OpenThread".to_owned(),
            ext_pan_id: 0xdead00beef00cafe,
            steering_data: vec![0xff, 0x0f],
            pan_id: 0x1234,
            joiner_udp_port: 1000,
            channel: 15,
            rssi: -42,
            lqi: 180,
            version: 4,
            is_native: true,
            is_joinable: false,
        };
        let decoded = ActiveScanResult::decode(&result.encode()).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn test_on_mesh_prefix_round_trip() {
        let prefix = crate::ot::OnMeshPrefix {
            prefix: Ip6Prefix {
                prefix: vec![0xfd, 0x00, 0xca, 0xfe, 0, 0, 0, 0],
                length: 64,
            },
            preference: -1,
            preferred: true,
            slaac: true,
            on_mesh: true,
            stable: true,
            ..crate::ot::OnMeshPrefix::default()
        };
        let decoded = crate::ot::OnMeshPrefix::decode(&prefix.encode()).unwrap();
        assert_eq!(decoded, prefix);
    }

    #[test]
    fn test_external_route_round_trip() {
        let route = ExternalRoute {
            prefix: Ip6Prefix {
                prefix: vec![0xfd, 0x11, 0, 0, 0, 0, 0, 0],
                length: 64,
            },
            rloc16: 0xfffe,
            preference: 0,
            stable: true,
            next_hop_is_this_device: false,
        };
        let decoded = ExternalRoute::decode(&route.encode()).unwrap();
        assert_eq!(decoded, route);
    }
}
