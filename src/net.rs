//! Raw socket and network-interface helpers.

use std::ffi::CString;
use std::io;
use std::net::IpAddr;
use std::os::unix::io::RawFd;

use log::warn;

/// Creates a non-blocking, close-on-exec IPv6 UDP socket.
pub fn udp6_socket() -> io::Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET6,
            libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            libc::IPPROTO_UDP,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Resolves an interface name to its index, 0 when unknown.
pub fn if_index(name: &str) -> u32 {
    let cname = match CString::new(name) {
        Ok(cname) => cname,
        Err(_) => return 0,
    };
    unsafe { libc::if_nametoindex(cname.as_ptr()) }
}

/// Census of the addresses currently configured on one interface.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkAddressCounts {
    pub link_local: u32,
    pub unique_local: u32,
    pub global_unicast: u32,
}

/// Counts the IPv6 addresses on `if_name` by scope, for reporting the state
/// of the infrastructure link.
pub fn link_address_counts(if_name: &str) -> LinkAddressCounts {
    let mut counts = LinkAddressCounts::default();

    let interfaces = match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(err) => {
            warn!("Failed to enumerate interfaces: {err}");
            return counts;
        }
    };

    for interface in interfaces {
        if interface.name != if_name {
            continue;
        }
        if let IpAddr::V6(addr) = interface.ip() {
            let segments = addr.segments();
            if (segments[0] & 0xffc0) == 0xfe80 {
                counts.link_local += 1;
            } else if (segments[0] & 0xfe00) == 0xfc00 {
                counts.unique_local += 1;
            } else if !addr.is_loopback() && !addr.is_unspecified() {
                counts.global_unicast += 1;
            }
        }
    }

    counts
}

/// Whether `if_name` currently exists and is administratively up.
pub fn link_is_up(if_name: &str) -> bool {
    if_index(if_name) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_index_of_unknown_interface_is_zero() {
        assert_eq!(if_index("does-not-exist-0"), 0);
    }

    #[test]
    fn test_loopback_has_an_index() {
        assert_ne!(if_index("lo"), 0);
    }
}
