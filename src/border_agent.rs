//! MeshCoP border agent advertisement and ephemeral key mode.
//!
//! Publishes the `_meshcop._udp` service describing this border router and,
//! while ephemeral key mode is active, `_meshcop-e._udp` plus a UDP proxy
//! bridging the host-side port to the agent's Thread-side port.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{info, warn};

use crate::dnssd::{encode_txt_data, Publisher, TxtEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::ot::{ChangedFlags, InstanceInterface};
use crate::udp_proxy::UdpProxy;

pub const MESHCOP_SERVICE_TYPE: &str = "_meshcop._udp";
pub const EPHEMERAL_MESHCOP_SERVICE_TYPE: &str = "_meshcop-e._udp";

// Agents that are not running advertise the discard port; the state bitmap
// tells clients not to connect.
const PLACEHOLDER_PORT: u16 = 9;

const DEFAULT_EPHEMERAL_KEY_LIFETIME: Duration = Duration::from_secs(120);

bitflags::bitflags! {
    /// State bitmap carried in the `sb` TXT entry (Thread 1.1.1 table 8-5).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct StateBitmap: u32 {
        const CONNECTION_MODE_PSKC       = 1;
        const THREAD_IF_STATUS_INITIALIZED = 1 << 3;
        const THREAD_IF_STATUS_ACTIVE    = 2 << 3;
        const HIGH_AVAILABILITY          = 1 << 5;
        const EPSKC_SUPPORTED            = 1 << 11;
    }
}

pub struct BorderAgent {
    publisher: Rc<RefCell<dyn Publisher>>,
    udp_proxy: Rc<RefCell<UdpProxy>>,
    vendor_name: String,
    product_name: String,
    published_txt: Option<Vec<u8>>,
    service_instance_name: Option<String>,
    ephemeral_active: bool,
}

impl BorderAgent {
    pub fn new(
        publisher: Rc<RefCell<dyn Publisher>>,
        udp_proxy: Rc<RefCell<UdpProxy>>,
        vendor_name: impl Into<String>,
        product_name: impl Into<String>,
    ) -> Self {
        BorderAgent {
            publisher,
            udp_proxy,
            vendor_name: vendor_name.into(),
            product_name: product_name.into(),
            published_txt: None,
            service_instance_name: None,
            ephemeral_active: false,
        }
    }

    pub fn ephemeral_key_active(&self) -> bool {
        self.ephemeral_active
    }

    /// Re-evaluates the MeshCoP advertisement after stack state changes.
    pub fn handle_state_changed(&mut self, instance: &mut dyn InstanceInterface, flags: ChangedFlags) {
        let interesting = ChangedFlags::THREAD_ROLE
            | ChangedFlags::THREAD_NETWORK_NAME
            | ChangedFlags::THREAD_EXT_PANID
            | ChangedFlags::ACTIVE_DATASET;
        if flags.intersects(interesting) {
            self.update_meshcop_service(instance);
        }
    }

    /// Publishes (or refreshes) the `_meshcop._udp` advertisement.
    pub fn update_meshcop_service(&mut self, instance: &mut dyn InstanceInterface) {
        let instance_name = self.service_instance_name(instance);
        let txt_entries = self.meshcop_txt_entries(instance);
        let txt = match encode_txt_data(&txt_entries) {
            Ok(txt) => txt,
            Err(err) => {
                warn!("Failed to encode MeshCoP TXT data: {err}");
                return;
            }
        };

        if self.published_txt.as_ref() == Some(&txt) {
            return;
        }

        let port = if instance.border_agent_is_active() {
            instance.border_agent_udp_port()
        } else {
            PLACEHOLDER_PORT
        };

        info!("Publishing MeshCoP service \"{instance_name}\" on port {port}");
        self.published_txt = Some(txt.clone());
        self.publisher.borrow_mut().publish_service(
            "",
            &instance_name,
            MESHCOP_SERVICE_TYPE,
            &[],
            port,
            &txt,
            Box::new(|result| {
                if let Err(err) = result {
                    warn!("Failed to publish MeshCoP service: {err}");
                }
            }),
        );
    }

    /// Activates ephemeral key mode: generates the ePSKc, starts the UDP
    /// proxy toward the agent port and advertises `_meshcop-e._udp`.
    ///
    /// A zero lifetime selects the default.
    pub fn activate_ephemeral_key_mode(
        &mut self,
        instance: &mut dyn InstanceInterface,
        lifetime_ms: u32,
    ) -> Result<String> {
        if self.ephemeral_active {
            return Err(Error::new(ErrorKind::Already, "Ephemeral key mode is active"));
        }

        let lifetime = if lifetime_ms == 0 {
            DEFAULT_EPHEMERAL_KEY_LIFETIME
        } else {
            Duration::from_millis(lifetime_ms as u64)
        };
        let epskc = instance.activate_ephemeral_key_mode(lifetime)?;
        let agent_port = instance.border_agent_udp_port();

        self.udp_proxy.borrow_mut().start(agent_port);

        let instance_name = self.service_instance_name(instance);
        self.publisher.borrow_mut().publish_service(
            "",
            &instance_name,
            EPHEMERAL_MESHCOP_SERVICE_TYPE,
            &[],
            agent_port,
            &[0],
            Box::new(|result| {
                if let Err(err) = result {
                    warn!("Failed to publish ephemeral MeshCoP service: {err}");
                }
            }),
        );

        self.ephemeral_active = true;
        info!("Ephemeral key mode activated for {lifetime:?}");
        Ok(epskc)
    }

    pub fn deactivate_ephemeral_key_mode(
        &mut self,
        instance: &mut dyn InstanceInterface,
    ) -> Result<()> {
        instance.deactivate_ephemeral_key_mode()?;
        self.udp_proxy.borrow_mut().stop();

        if self.ephemeral_active {
            let instance_name = self.service_instance_name(instance);
            self.publisher.borrow_mut().unpublish_service(
                &instance_name,
                EPHEMERAL_MESHCOP_SERVICE_TYPE,
                Box::new(|_| {}),
            );
        }
        self.ephemeral_active = false;
        info!("Ephemeral key mode deactivated");
        Ok(())
    }

    // The last two bytes of the extended address keep the name stable across
    // restarts while avoiding collisions between nearby agents.
    fn service_instance_name(&mut self, instance: &dyn InstanceInterface) -> String {
        if let Some(name) = &self.service_instance_name {
            return name.clone();
        }
        let ext_address = instance.extended_address().to_be_bytes();
        let name = format!("{} ({})", self.product_name, hex::encode(&ext_address[6..]));
        self.service_instance_name = Some(name.clone());
        name
    }

    fn meshcop_txt_entries(&self, instance: &dyn InstanceInterface) -> Vec<TxtEntry> {
        let mut entries = Vec::new();
        let commissioned = instance
            .active_dataset_tlvs()
            .map(|tlvs| !tlvs.is_empty())
            .unwrap_or(false);

        let mut state = StateBitmap::HIGH_AVAILABILITY | StateBitmap::EPSKC_SUPPORTED;
        if instance.border_agent_is_active() {
            state |= StateBitmap::CONNECTION_MODE_PSKC;
        }
        if commissioned {
            if instance.device_role() == crate::ot::DeviceRole::Disabled {
                state |= StateBitmap::THREAD_IF_STATUS_INITIALIZED;
            } else {
                state |= StateBitmap::THREAD_IF_STATUS_ACTIVE;
            }
        }

        entries.push(TxtEntry::new("rv", b"1"));
        entries.push(TxtEntry::new("tv", b"1.3.0"));
        entries.push(TxtEntry::new("sb", state.bits().to_be_bytes()));

        if commissioned {
            let network_name = instance.network_name();
            if !network_name.is_empty() {
                entries.push(TxtEntry::new("nn", network_name.as_bytes()));
            }
            entries.push(TxtEntry::new("xp", instance.ext_pan_id().to_be_bytes()));
        }

        entries.push(TxtEntry::new("vn", self.vendor_name.as_bytes()));
        entries.push(TxtEntry::new("mn", self.product_name.as_bytes()));
        entries.push(TxtEntry::new("xa", instance.extended_address().to_be_bytes()));

        if instance.device_role().is_attached() {
            entries.push(TxtEntry::new("pt", instance.partition_id().to_be_bytes()));
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_bitmap_field_encoding() {
        let state = StateBitmap::HIGH_AVAILABILITY | StateBitmap::THREAD_IF_STATUS_ACTIVE;
        assert_eq!(state.bits(), (1 << 5) | (2 << 3));
    }
}
