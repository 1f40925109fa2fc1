//! DNS-SD advertising and browsing contract.
//!
//! The [`Publisher`] trait is the only surface the rest of the agent sees; a
//! concrete backend (Avahi, mDNSResponder, or the in-process
//! [`local::LocalPublisher`]) mirrors registrations into link-local multicast
//! DNS on the infrastructure interface and fans discovery results back out to
//! subscribers.

pub mod local;
pub mod platform;

use std::net::Ipv6Addr;

use crate::error::{Error, ErrorKind, Result};

/// The default mDNS domain suffix used in fully-qualified names.
pub const DEFAULT_DOMAIN: &str = "local.";

/// Default record TTL, in seconds.
pub const DEFAULT_TTL: u32 = 10;

/// Aggregate readiness of a publisher backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Underlying mDNS service is not ready to publish.
    Idle,
    /// Publishing and subscribing are available.
    Ready,
}

/// Completion callback for a publish/unpublish request.
pub type ResultCallback = Box<dyn FnOnce(Result<()>)>;

/// Observer invoked on every publisher state transition.
pub type StateObserver = Box<dyn FnMut(State)>;

/// One `key[=value]` TXT entry. A `None` value is a boolean attribute
/// (`key` alone on the wire); values may be arbitrary bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtEntry {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl TxtEntry {
    pub fn new(key: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        TxtEntry {
            key: key.into(),
            value: Some(value.as_ref().to_vec()),
        }
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        TxtEntry {
            key: key.into(),
            value: None,
        }
    }
}

/// Discovery result for one service instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredInstanceInfo {
    /// True when the instance was removed rather than resolved.
    pub removed: bool,
    pub netif_index: u32,
    pub instance_name: String,
    pub host_name: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub addresses: Vec<Ipv6Addr>,
    pub txt_data: Vec<u8>,
    pub ttl: u32,
}

/// Discovery result for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredHostInfo {
    pub host_name: String,
    pub addresses: Vec<Ipv6Addr>,
    pub ttl: u32,
}

/// Callback invoked when a subscribed service instance resolves or goes away.
pub type InstanceCallback = Box<dyn FnMut(&str, &DiscoveredInstanceInfo)>;

/// Callback invoked when a subscribed host resolves.
pub type HostCallback = Box<dyn FnMut(&str, &DiscoveredHostInfo)>;

/// Identifier handed back by `add_subscription_callbacks`.
pub type SubscriberId = u64;

/// Asynchronous mDNS publishing and browsing.
///
/// All publish/unpublish operations complete through their `ResultCallback`,
/// delivered from a reactor `process` pass and never re-entrantly within the
/// requesting call. Instance registration is keyed by `(service_type,
/// instance_name)`; republishing the same key overwrites the record.
pub trait Publisher {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_started(&self) -> bool;
    fn state(&self) -> State;

    fn add_state_observer(&mut self, observer: StateObserver);

    #[allow(clippy::too_many_arguments)]
    fn publish_service(
        &mut self,
        host_name: &str,
        instance_name: &str,
        service_type: &str,
        sub_types: &[String],
        port: u16,
        txt_data: &[u8],
        callback: ResultCallback,
    );

    fn unpublish_service(&mut self, instance_name: &str, service_type: &str, callback: ResultCallback);

    fn publish_host(&mut self, host_name: &str, addresses: &[Ipv6Addr], callback: ResultCallback);

    fn unpublish_host(&mut self, host_name: &str, callback: ResultCallback);

    fn publish_key(&mut self, name: &str, key_data: &[u8], callback: ResultCallback);

    fn unpublish_key(&mut self, name: &str, callback: ResultCallback);

    /// Empty `instance_name` subscribes to a browse on the whole type;
    /// otherwise to resolution of that one instance.
    fn subscribe_service(&mut self, service_type: &str, instance_name: &str);

    fn unsubscribe_service(&mut self, service_type: &str, instance_name: &str);

    fn subscribe_host(&mut self, host_name: &str);

    fn unsubscribe_host(&mut self, host_name: &str);

    fn add_subscription_callbacks(
        &mut self,
        instance_callback: InstanceCallback,
        host_callback: HostCallback,
    ) -> SubscriberId;

    fn remove_subscription_callbacks(&mut self, id: SubscriberId);
}

/// Encodes a TXT entry list into the RFC 6763 §6 length-prefixed wire form.
///
/// An empty list encodes as a single zero byte, matching what mDNS requires
/// for services without attributes.
pub fn encode_txt_data(entries: &[TxtEntry]) -> Result<Vec<u8>> {
    let mut data = Vec::new();

    for entry in entries {
        let value_len = entry.value.as_ref().map(|v| v.len() + 1).unwrap_or(0);
        let total = entry.key.len() + value_len;
        if entry.key.is_empty() || total > u8::MAX as usize {
            return Err(Error::new(
                ErrorKind::InvalidArgs,
                format!("Bad TXT entry key \"{}\"", entry.key),
            ));
        }

        data.push(total as u8);
        data.extend_from_slice(entry.key.as_bytes());
        if let Some(value) = &entry.value {
            data.push(b'=');
            data.extend_from_slice(value);
        }
    }

    if data.is_empty() {
        data.push(0);
    }

    Ok(data)
}

/// Decodes RFC 6763 §6 TXT data back into an entry list.
pub fn decode_txt_data(data: &[u8]) -> Result<Vec<TxtEntry>> {
    let mut entries = Vec::new();
    let mut at = 0usize;

    while at < data.len() {
        let len = data[at] as usize;
        at += 1;
        if len == 0 {
            continue;
        }
        if at + len > data.len() {
            return Err(Error::new(ErrorKind::Parse, "Truncated TXT data"));
        }

        let chunk = &data[at..at + len];
        at += len;

        match chunk.iter().position(|&b| b == b'=') {
            Some(eq) => {
                let key = String::from_utf8(chunk[..eq].to_vec())
                    .map_err(|_| Error::new(ErrorKind::Parse, "TXT key is not UTF-8"))?;
                entries.push(TxtEntry {
                    key,
                    value: Some(chunk[eq + 1..].to_vec()),
                });
            }
            None => {
                let key = String::from_utf8(chunk.to_vec())
                    .map_err(|_| Error::new(ErrorKind::Parse, "TXT key is not UTF-8"))?;
                entries.push(TxtEntry { key, value: None });
            }
        }
    }

    Ok(entries)
}

/// Appends the default domain when `name` is not already fully qualified.
pub(crate) fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{name}.{DEFAULT_DOMAIN}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multimap::MultiMap;

    fn as_multimap(entries: &[TxtEntry]) -> MultiMap<String, Option<Vec<u8>>> {
        let mut map = MultiMap::new();
        for entry in entries {
            map.insert(entry.key.clone(), entry.value.clone());
        }
        map
    }

    #[test]
    fn test_txt_round_trip_as_multimap() {
        let entries = vec![
            TxtEntry::new("a", b"1"),
            TxtEntry::new("b", b"2"),
            TxtEntry::boolean("flag"),
            TxtEntry::new("bin", [0u8, 255, 3]),
            TxtEntry::new("a", b"3"),
        ];

        let data = encode_txt_data(&entries).unwrap();
        let decoded = decode_txt_data(&data).unwrap();

        assert_eq!(as_multimap(&entries), as_multimap(&decoded));
    }

    #[test]
    fn test_empty_txt_list_encodes_single_zero() {
        let data = encode_txt_data(&[]).unwrap();
        assert_eq!(data, vec![0]);
        assert!(decode_txt_data(&data).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_txt_entry_rejected() {
        let entries = vec![TxtEntry::new("k", vec![0u8; 300])];
        let err = encode_txt_data(&entries).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgs);
    }

    #[test]
    fn test_truncated_txt_data_rejected() {
        let err = decode_txt_data(&[5, b'a']).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_fully_qualified_appends_domain_once() {
        assert_eq!(fully_qualified("host1"), "host1.local.");
        assert_eq!(fully_qualified("host1.local."), "host1.local.");
    }
}
