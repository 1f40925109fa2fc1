//! The `io.openthread.BorderRouter` D-Bus object.
//!
//! Front-end for system integrators: every method decodes its typed
//! arguments, drives the host (or border agent) and answers through the
//! request, either synchronously for plain reads or from the parked receiver
//! once the stack reports completion.

use std::cell::RefCell;
use std::convert::TryFrom;
use std::rc::Rc;

use crate::border_agent::BorderAgent;
use crate::dbus::connection::{DBusConnection, DBUS_OBJECT_PREFIX, DBUS_THREAD_INTERFACE};
use crate::dbus::object::DBusObject;
use crate::dbus::types::InfraLinkInfo;
use crate::dbus::value::{DBusDecode, DBusEncode, Value};
use crate::error::{Error, ErrorKind, Result};
use crate::net;
use crate::ot::{ChangedFlags, DatasetTlvs, InstanceInterface, JoinerStartInfo, OnMeshPrefix};
use crate::rcp_host::RcpHost;
use crate::thread_helper::{AttachArgs, ATTACH_ALL_NODES_DELAY_MS};

pub const SCAN_METHOD: &str = "Scan";
pub const ENERGY_SCAN_METHOD: &str = "EnergyScan";
pub const ATTACH_METHOD: &str = "Attach";
pub const DETACH_METHOD: &str = "Detach";
pub const RESET_METHOD: &str = "Reset";
pub const FACTORY_RESET_METHOD: &str = "FactoryReset";
pub const LEAVE_NETWORK_METHOD: &str = "LeaveNetwork";
pub const JOINER_START_METHOD: &str = "JoinerStart";
pub const JOINER_STOP_METHOD: &str = "JoinerStop";
pub const ADD_ON_MESH_PREFIX_METHOD: &str = "AddOnMeshPrefix";
pub const REMOVE_ON_MESH_PREFIX_METHOD: &str = "RemoveOnMeshPrefix";
pub const ADD_EXTERNAL_ROUTE_METHOD: &str = "AddExternalRoute";
pub const REMOVE_EXTERNAL_ROUTE_METHOD: &str = "RemoveExternalRoute";
pub const SET_THREAD_ENABLED_METHOD: &str = "SetThreadEnabled";
pub const ATTACH_ALL_NODES_TO_METHOD: &str = "AttachAllNodesTo";
pub const SET_NAT64_ENABLED_METHOD: &str = "SetNat64Enabled";
pub const ACTIVATE_EPHEMERAL_KEY_MODE_METHOD: &str = "ActivateEphemeralKeyMode";
pub const DEACTIVATE_EPHEMERAL_KEY_MODE_METHOD: &str = "DeactivateEphemeralKeyMode";

pub const READY_SIGNAL: &str = "Ready";

pub const DEVICE_ROLE_PROPERTY: &str = "DeviceRole";
pub const LINK_MODE_PROPERTY: &str = "LinkMode";
pub const NETWORK_NAME_PROPERTY: &str = "NetworkName";
pub const PANID_PROPERTY: &str = "PanId";
pub const EXTPANID_PROPERTY: &str = "ExtPanId";
pub const CHANNEL_PROPERTY: &str = "Channel";
pub const NETWORK_KEY_PROPERTY: &str = "NetworkKey";
pub const RLOC16_PROPERTY: &str = "Rloc16";
pub const EXTENDED_ADDRESS_PROPERTY: &str = "ExtendedAddress";
pub const ROUTER_ID_PROPERTY: &str = "RouterId";
pub const LEADER_DATA_PROPERTY: &str = "LeaderData";
pub const NETWORK_DATA_PROPERTY: &str = "NetworkData";
pub const STABLE_NETWORK_DATA_PROPERTY: &str = "StableNetworkData";
pub const ACTIVE_DATASET_TLVS_PROPERTY: &str = "ActiveDatasetTlvs";
pub const PENDING_DATASET_TLVS_PROPERTY: &str = "PendingDatasetTlvs";
pub const MESH_LOCAL_PREFIX_PROPERTY: &str = "MeshLocalPrefix";
pub const LEGACY_ULA_PREFIX_PROPERTY: &str = "LegacyULAPrefix";
pub const RADIO_REGION_PROPERTY: &str = "RadioRegion";
pub const SUPPORTED_CHANNEL_MASK_PROPERTY: &str = "SupportedChannelMask";
pub const PREFERRED_CHANNEL_MASK_PROPERTY: &str = "PreferredChannelMask";
pub const LINK_COUNTERS_PROPERTY: &str = "LinkCounters";
pub const IP6_COUNTERS_PROPERTY: &str = "Ip6Counters";
pub const EXTERNAL_ROUTES_PROPERTY: &str = "ExternalRoutes";
pub const ON_MESH_PREFIXES_PROPERTY: &str = "OnMeshPrefixes";
pub const TREL_INFO_PROPERTY: &str = "TrelInfo";
pub const SRP_SERVER_INFO_PROPERTY: &str = "SrpServerInfo";
pub const DNSSD_COUNTERS_PROPERTY: &str = "DnssdCounters";
pub const BORDER_ROUTING_COUNTERS_PROPERTY: &str = "BorderRoutingCounters";
pub const NAT64_STATE_PROPERTY: &str = "Nat64State";
pub const NAT64_MAPPINGS_PROPERTY: &str = "Nat64Mappings";
pub const NAT64_CIDR_PROPERTY: &str = "Nat64Cidr";
pub const EPHEMERAL_KEY_ENABLED_PROPERTY: &str = "EphemeralKeyEnabled";
pub const INFRA_LINK_INFO_PROPERTY: &str = "InfraLinkInfo";
pub const TELEMETRY_DATA_PROPERTY: &str = "TelemetryData";
pub const CAPABILITIES_PROPERTY: &str = "Capabilities";
pub const UPTIME_PROPERTY: &str = "Uptime";
pub const OTBR_VERSION_PROPERTY: &str = "OtbrVersion";
pub const OT_HOST_VERSION_PROPERTY: &str = "OtHostVersion";
pub const OT_RCP_VERSION_PROPERTY: &str = "OtRcpVersion";
pub const THREAD_VERSION_PROPERTY: &str = "ThreadVersion";

pub struct DBusThreadObject {
    object: DBusObject,
}

impl DBusThreadObject {
    /// Builds the object, registers every method and property handler, binds
    /// the object path and announces `Ready`.
    pub fn new(
        connection: &DBusConnection,
        host: &Rc<RefCell<RcpHost>>,
        border_agent: &Rc<RefCell<BorderAgent>>,
        infra_if_name: Option<String>,
    ) -> Result<Self> {
        let interface_name = host.borrow().interface_name().to_owned();
        let object = DBusObject::new(
            connection.clone(),
            format!("{DBUS_OBJECT_PREFIX}{interface_name}"),
        );

        let this = DBusThreadObject { object };
        this.register_methods(host, border_agent);
        this.register_properties(host, infra_if_name);
        this.object.init()?;
        this.wire_signals(host);
        this.object.signal(DBUS_THREAD_INTERFACE, READY_SIGNAL, ());
        Ok(this)
    }

    pub fn object(&self) -> &DBusObject {
        &self.object
    }

    pub fn path(&self) -> &str {
        self.object.path()
    }

    fn register_methods(&self, host: &Rc<RefCell<RcpHost>>, border_agent: &Rc<RefCell<BorderAgent>>) {
        let object = &self.object;

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, SCAN_METHOD, move |request| {
            host_.borrow_mut().active_scan(Box::new(move |result| match result {
                Ok(results) => request.reply((results,)),
                Err(err) => request.reply_error(&err),
            }));
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, ENERGY_SCAN_METHOD, move |request| {
            let (scan_duration_ms,): (u32,) = match request.args() {
                Ok(args) => args,
                Err(err) => return request.reply_error(&err),
            };
            let duration = std::time::Duration::from_millis(scan_duration_ms as u64);
            host_
                .borrow_mut()
                .energy_scan(duration, Box::new(move |result| match result {
                    Ok(results) => request.reply((results,)),
                    Err(err) => request.reply_error(&err),
                }));
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, ATTACH_METHOD, move |request| {
            let args = if request.message().body.is_empty() {
                None
            } else {
                let decoded: (Vec<u8>, u16, String, u64, Vec<u8>, u32) = match request.args() {
                    Ok(args) => args,
                    Err(err) => return request.reply_error(&err),
                };
                let (network_key, pan_id, network_name, ext_pan_id, pskc, channel_mask) = decoded;
                Some(AttachArgs {
                    network_name,
                    pan_id,
                    ext_pan_id,
                    network_key,
                    pskc,
                    channel_mask,
                })
            };
            host_
                .borrow_mut()
                .attach(args, Box::new(move |result| request.reply_result(result)));
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, DETACH_METHOD, move |request| {
            let result = host_.borrow_mut().detach();
            request.reply_result(result);
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, RESET_METHOD, move |request| {
            let result = host_.borrow_mut().reset();
            request.reply_result(result);
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, FACTORY_RESET_METHOD, move |request| {
            let result = (|| {
                let mut host = host_.borrow_mut();
                host.detach()?;
                match host.instance_mut() {
                    Some(instance) => instance.erase_persistent_info(),
                    None => Err(not_initialized()),
                }
            })();
            request.reply_result(result);
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, LEAVE_NETWORK_METHOD, move |request| {
            host_
                .borrow_mut()
                .leave(true, Box::new(move |result| request.reply_result(result)));
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, JOINER_START_METHOD, move |request| {
            let decoded: (String, String, String, String, String, String) = match request.args() {
                Ok(args) => args,
                Err(err) => return request.reply_error(&err),
            };
            let (pskd, provisioning_url, vendor_name, vendor_model, vendor_sw_version, vendor_data) =
                decoded;
            let joiner_info = JoinerStartInfo {
                pskd,
                provisioning_url,
                vendor_name,
                vendor_model,
                vendor_sw_version,
                vendor_data,
            };
            host_
                .borrow_mut()
                .joiner_start(&joiner_info, Box::new(move |result| request.reply_result(result)));
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, JOINER_STOP_METHOD, move |request| {
            host_.borrow_mut().joiner_stop();
            request.reply(());
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, ADD_ON_MESH_PREFIX_METHOD, move |request| {
            let (prefix,): (OnMeshPrefix,) = match request.args() {
                Ok(args) => args,
                Err(err) => return request.reply_error(&err),
            };
            let result = with_instance_mut(&host_, |instance| instance.add_on_mesh_prefix(&prefix));
            request.reply_result(result);
        });

        let host_ = host.clone();
        object.register_method(
            DBUS_THREAD_INTERFACE,
            REMOVE_ON_MESH_PREFIX_METHOD,
            move |request| {
                let (prefix,): (crate::ot::Ip6Prefix,) = match request.args() {
                    Ok(args) => args,
                    Err(err) => return request.reply_error(&err),
                };
                let result =
                    with_instance_mut(&host_, |instance| instance.remove_on_mesh_prefix(&prefix));
                request.reply_result(result);
            },
        );

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, ADD_EXTERNAL_ROUTE_METHOD, move |request| {
            let (route,): (crate::ot::ExternalRoute,) = match request.args() {
                Ok(args) => args,
                Err(err) => return request.reply_error(&err),
            };
            let result = with_instance_mut(&host_, |instance| instance.add_external_route(&route));
            request.reply_result(result);
        });

        let host_ = host.clone();
        object.register_method(
            DBUS_THREAD_INTERFACE,
            REMOVE_EXTERNAL_ROUTE_METHOD,
            move |request| {
                let (prefix,): (crate::ot::Ip6Prefix,) = match request.args() {
                    Ok(args) => args,
                    Err(err) => return request.reply_error(&err),
                };
                let result =
                    with_instance_mut(&host_, |instance| instance.remove_external_route(&prefix));
                request.reply_result(result);
            },
        );

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, SET_THREAD_ENABLED_METHOD, move |request| {
            let (enabled,): (bool,) = match request.args() {
                Ok(args) => args,
                Err(err) => return request.reply_error(&err),
            };
            host_
                .borrow_mut()
                .set_thread_enabled(enabled, Box::new(move |result| request.reply_result(result)));
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, ATTACH_ALL_NODES_TO_METHOD, move |request| {
            let (tlvs,): (Vec<u8>,) = match request.args() {
                Ok(args) => args,
                Err(err) => return request.reply_error(&err),
            };
            let dataset = match DatasetTlvs::try_from(tlvs.as_slice()) {
                Ok(dataset) => dataset,
                Err(err) => return request.reply_error(&err),
            };
            host_
                .borrow_mut()
                .attach_all_nodes_to(dataset, Box::new(move |result| match result {
                    Ok(()) => request.reply((ATTACH_ALL_NODES_DELAY_MS as i64,)),
                    Err(err) => request.reply_error(&err),
                }));
        });

        let host_ = host.clone();
        object.register_method(DBUS_THREAD_INTERFACE, SET_NAT64_ENABLED_METHOD, move |request| {
            let (enabled,): (bool,) = match request.args() {
                Ok(args) => args,
                Err(err) => return request.reply_error(&err),
            };
            let result = with_instance_mut(&host_, |instance| {
                instance.nat64_set_enabled(enabled);
                Ok(())
            });
            request.reply_result(result);
        });

        let host_ = host.clone();
        let agent_ = border_agent.clone();
        object.register_method(
            DBUS_THREAD_INTERFACE,
            ACTIVATE_EPHEMERAL_KEY_MODE_METHOD,
            move |request| {
                let (lifetime_ms,): (u32,) = match request.args() {
                    Ok(args) => args,
                    Err(err) => return request.reply_error(&err),
                };
                let result = {
                    let mut host = host_.borrow_mut();
                    match host.instance_mut() {
                        Some(instance) => agent_
                            .borrow_mut()
                            .activate_ephemeral_key_mode(instance, lifetime_ms),
                        None => Err(not_initialized()),
                    }
                };
                match result {
                    Ok(epskc) => request.reply((epskc,)),
                    Err(err) => request.reply_error(&err),
                }
            },
        );

        let host_ = host.clone();
        let agent_ = border_agent.clone();
        object.register_method(
            DBUS_THREAD_INTERFACE,
            DEACTIVATE_EPHEMERAL_KEY_MODE_METHOD,
            move |request| {
                let result = {
                    let mut host = host_.borrow_mut();
                    match host.instance_mut() {
                        Some(instance) => {
                            agent_.borrow_mut().deactivate_ephemeral_key_mode(instance)
                        }
                        None => Err(not_initialized()),
                    }
                };
                request.reply_result(result);
            },
        );
    }

    fn register_properties(&self, host: &Rc<RefCell<RcpHost>>, infra_if_name: Option<String>) {
        let object = &self.object;

        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            DEVICE_ROLE_PROPERTY,
            get_with_instance(host, |instance| {
                Value::Str(instance.device_role().name().to_owned())
            }),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            LINK_MODE_PROPERTY,
            get_with_instance(host, |instance| instance.link_mode().encode()),
        );
        object.register_set_property(
            DBUS_THREAD_INTERFACE,
            LINK_MODE_PROPERTY,
            set_with_instance(host, |instance, value| {
                let mode = crate::ot::LinkModeConfig::decode(value)?;
                instance.set_link_mode(mode)
            }),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            NETWORK_NAME_PROPERTY,
            get_with_instance(host, |instance| Value::Str(instance.network_name())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            PANID_PROPERTY,
            get_with_instance(host, |instance| Value::U16(instance.pan_id())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            EXTPANID_PROPERTY,
            get_with_instance(host, |instance| Value::U64(instance.ext_pan_id())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            CHANNEL_PROPERTY,
            get_with_instance(host, |instance| Value::U16(instance.channel() as u16)),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            NETWORK_KEY_PROPERTY,
            get_with_instance(host, |instance| Value::bytes(&instance.network_key())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            RLOC16_PROPERTY,
            get_with_instance(host, |instance| Value::U16(instance.rloc16())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            EXTENDED_ADDRESS_PROPERTY,
            get_with_instance(host, |instance| Value::U64(instance.extended_address())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            ROUTER_ID_PROPERTY,
            get_with_instance(host, |instance| Value::Byte((instance.rloc16() >> 10) as u8)),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            LEADER_DATA_PROPERTY,
            get_with_instance(host, |instance| instance.leader_data().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            NETWORK_DATA_PROPERTY,
            get_with_instance(host, |instance| Value::bytes(&instance.network_data())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            STABLE_NETWORK_DATA_PROPERTY,
            get_with_instance(host, |instance| Value::bytes(&instance.stable_network_data())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            ACTIVE_DATASET_TLVS_PROPERTY,
            get_with_instance_result(host, |instance| {
                instance
                    .active_dataset_tlvs()
                    .map(|tlvs| Value::bytes(tlvs.as_slice()))
                    .ok_or_else(|| Error::new(ErrorKind::NotFound, "No active dataset"))
            }),
        );
        object.register_set_property(
            DBUS_THREAD_INTERFACE,
            ACTIVE_DATASET_TLVS_PROPERTY,
            set_with_instance(host, |instance, value| {
                let tlvs = DatasetTlvs::try_from(value.as_bytes()?.as_slice())?;
                instance.set_active_dataset_tlvs(&tlvs)
            }),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            PENDING_DATASET_TLVS_PROPERTY,
            get_with_instance_result(host, |instance| {
                instance
                    .pending_dataset_tlvs()
                    .map(|tlvs| Value::bytes(tlvs.as_slice()))
                    .ok_or_else(|| Error::new(ErrorKind::NotFound, "No pending dataset"))
            }),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            MESH_LOCAL_PREFIX_PROPERTY,
            get_with_instance(host, |instance| Value::bytes(&instance.mesh_local_prefix())),
        );
        object.register_set_property(
            DBUS_THREAD_INTERFACE,
            MESH_LOCAL_PREFIX_PROPERTY,
            set_with_instance(host, |instance, value| {
                instance.set_mesh_local_prefix(decode_prefix_bytes(value)?)
            }),
        );
        object.register_set_property(
            DBUS_THREAD_INTERFACE,
            LEGACY_ULA_PREFIX_PROPERTY,
            set_with_instance(host, |instance, value| set_legacy_ula_prefix(instance, value)),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            RADIO_REGION_PROPERTY,
            get_with_instance_result(host, |instance| {
                instance
                    .region()
                    .map(Value::Str)
                    .ok_or_else(|| Error::new(ErrorKind::NotFound, "Region not set"))
            }),
        );
        object.register_set_property(
            DBUS_THREAD_INTERFACE,
            RADIO_REGION_PROPERTY,
            set_with_instance(host, |instance, value| instance.set_region(value.as_str()?)),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            SUPPORTED_CHANNEL_MASK_PROPERTY,
            get_with_instance(host, |instance| Value::U32(instance.supported_channel_mask())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            PREFERRED_CHANNEL_MASK_PROPERTY,
            get_with_instance(host, |instance| Value::U32(instance.preferred_channel_mask())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            LINK_COUNTERS_PROPERTY,
            get_with_instance(host, |instance| instance.link_counters().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            IP6_COUNTERS_PROPERTY,
            get_with_instance(host, |instance| instance.ip6_counters().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            EXTERNAL_ROUTES_PROPERTY,
            get_with_instance(host, |instance| instance.external_routes().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            ON_MESH_PREFIXES_PROPERTY,
            get_with_instance(host, |instance| instance.on_mesh_prefixes().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            TREL_INFO_PROPERTY,
            get_with_instance(host, |instance| instance.trel_info().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            SRP_SERVER_INFO_PROPERTY,
            get_with_instance(host, |instance| instance.srp_server_info().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            DNSSD_COUNTERS_PROPERTY,
            get_with_instance(host, |instance| instance.dnssd_counters().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            BORDER_ROUTING_COUNTERS_PROPERTY,
            get_with_instance(host, |instance| instance.border_routing_counters().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            NAT64_STATE_PROPERTY,
            get_with_instance(host, |instance| {
                Value::Str(instance.nat64_state().name().to_owned())
            }),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            NAT64_MAPPINGS_PROPERTY,
            get_with_instance(host, |instance| instance.nat64_mappings().encode()),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            NAT64_CIDR_PROPERTY,
            get_with_instance_result(host, |instance| {
                instance
                    .nat64_cidr()
                    .map(Value::Str)
                    .ok_or_else(|| Error::new(ErrorKind::NotFound, "No NAT64 CIDR configured"))
            }),
        );
        object.register_set_property(
            DBUS_THREAD_INTERFACE,
            NAT64_CIDR_PROPERTY,
            set_with_instance(host, |instance, value| instance.set_nat64_cidr(value.as_str()?)),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            EPHEMERAL_KEY_ENABLED_PROPERTY,
            get_with_instance(host, |instance| Value::Bool(instance.ephemeral_key_enabled())),
        );
        object.register_set_property(
            DBUS_THREAD_INTERFACE,
            EPHEMERAL_KEY_ENABLED_PROPERTY,
            set_with_instance(host, |instance, value| {
                let enabled = bool::decode(value)?;
                if !enabled && instance.ephemeral_key_enabled() {
                    instance.deactivate_ephemeral_key_mode()
                } else {
                    Ok(())
                }
            }),
        );

        let infra_name = infra_if_name.unwrap_or_default();
        object.register_get_property(DBUS_THREAD_INTERFACE, INFRA_LINK_INFO_PROPERTY, move || {
            let info = InfraLinkInfo {
                name: infra_name.clone(),
                is_up: net::link_is_up(&infra_name),
                address_counts: net::link_address_counts(&infra_name),
            };
            Ok(info.encode())
        });

        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            TELEMETRY_DATA_PROPERTY,
            get_with_instance(host, |instance| Value::bytes(&instance.telemetry_data())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            CAPABILITIES_PROPERTY,
            get_with_instance(host, |instance| Value::bytes(&instance.capabilities())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            UPTIME_PROPERTY,
            get_with_instance(host, |instance| Value::U64(instance.uptime_ms())),
        );
        object.register_get_property(DBUS_THREAD_INTERFACE, OTBR_VERSION_PROPERTY, || {
            Ok(Value::Str(env!("CARGO_PKG_VERSION").to_owned()))
        });
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            OT_HOST_VERSION_PROPERTY,
            get_with_instance(host, |instance| Value::Str(instance.host_version())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            OT_RCP_VERSION_PROPERTY,
            get_with_instance(host, |instance| Value::Str(instance.rcp_version())),
        );
        object.register_get_property(
            DBUS_THREAD_INTERFACE,
            THREAD_VERSION_PROPERTY,
            get_with_instance(host, |instance| Value::U16(instance.thread_version())),
        );
    }

    fn wire_signals(&self, host: &Rc<RefCell<RcpHost>>) {
        let object = self.object.clone();
        host.borrow_mut()
            .add_thread_state_changed_callback(Box::new(move |flags, instance| {
                if flags.contains(ChangedFlags::THREAD_ROLE) {
                    object.signal_property_changed(
                        DBUS_THREAD_INTERFACE,
                        DEVICE_ROLE_PROPERTY,
                        Value::Str(instance.device_role().name().to_owned()),
                    );
                }
                if flags.contains(ChangedFlags::ACTIVE_DATASET) {
                    if let Some(tlvs) = instance.active_dataset_tlvs() {
                        object.signal_property_changed(
                            DBUS_THREAD_INTERFACE,
                            ACTIVE_DATASET_TLVS_PROPERTY,
                            Value::bytes(tlvs.as_slice()),
                        );
                    }
                }
            }));
    }
}

fn not_initialized() -> Error {
    Error::new(ErrorKind::InvalidState, "OT is not initialized")
}

fn with_instance_mut(
    host: &Rc<RefCell<RcpHost>>,
    f: impl FnOnce(&mut dyn InstanceInterface) -> Result<()>,
) -> Result<()> {
    let mut host = host.borrow_mut();
    match host.instance_mut() {
        Some(instance) => f(instance),
        None => Err(not_initialized()),
    }
}

fn get_with_instance(
    host: &Rc<RefCell<RcpHost>>,
    f: impl Fn(&dyn InstanceInterface) -> Value + 'static,
) -> impl FnMut() -> Result<Value> {
    let host = host.clone();
    move || {
        let host = host.borrow();
        match host.instance() {
            Some(instance) => Ok(f(instance)),
            None => Err(not_initialized()),
        }
    }
}

fn get_with_instance_result(
    host: &Rc<RefCell<RcpHost>>,
    f: impl Fn(&dyn InstanceInterface) -> Result<Value> + 'static,
) -> impl FnMut() -> Result<Value> {
    let host = host.clone();
    move || {
        let host = host.borrow();
        match host.instance() {
            Some(instance) => f(instance),
            None => Err(not_initialized()),
        }
    }
}

fn set_with_instance(
    host: &Rc<RefCell<RcpHost>>,
    f: impl Fn(&mut dyn InstanceInterface, &Value) -> Result<()> + 'static,
) -> impl FnMut(&Value) -> Result<()> {
    let host = host.clone();
    move |value| {
        let mut host = host.borrow_mut();
        match host.instance_mut() {
            Some(instance) => f(instance, value),
            None => Err(not_initialized()),
        }
    }
}

fn decode_prefix_bytes(value: &Value) -> Result<[u8; 8]> {
    let bytes = value.as_bytes()?;
    if bytes.len() != 8 {
        return Err(Error::new(ErrorKind::InvalidArgs, "Prefix must be 8 bytes"));
    }
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&bytes);
    Ok(prefix)
}

#[cfg(feature = "legacy-ula-prefix")]
fn set_legacy_ula_prefix(instance: &mut dyn InstanceInterface, value: &Value) -> Result<()> {
    instance.set_legacy_ula_prefix(decode_prefix_bytes(value)?)
}

#[cfg(not(feature = "legacy-ula-prefix"))]
fn set_legacy_ula_prefix(_instance: &mut dyn InstanceInterface, _value: &Value) -> Result<()> {
    Err(Error::new(
        ErrorKind::NotImplemented,
        "Legacy ULA prefix support is not compiled in",
    ))
}
