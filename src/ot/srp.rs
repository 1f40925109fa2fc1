//! SRP server data model consumed by the advertising proxy.

use std::net::Ipv6Addr;

use crate::ot::SrpUpdateId;

/// One service registered by an SRP client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrpService {
    /// Instance label, e.g. `My Service`.
    pub instance_name: String,
    /// Service type, e.g. `_srv._udp`.
    pub service_type: String,
    pub sub_type_labels: Vec<String>,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub txt_data: Vec<u8>,
    pub deleted: bool,
    pub ttl: u32,
}

/// One host registered by an SRP client, with its services.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrpHost {
    /// Host label without the domain, e.g. `host1`.
    pub host_name: String,
    pub addresses: Vec<Ipv6Addr>,
    pub deleted: bool,
    pub services: Vec<SrpService>,
}

/// An SRP update transaction handed to the advertising handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpUpdate {
    pub id: SrpUpdateId,
    pub host: SrpHost,
    /// Time the server allows for completing the transaction, in ms.
    pub timeout_ms: u32,
}
