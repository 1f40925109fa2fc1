//! Bridges a host-side ephemeral UDP port to a Thread-side port.
//!
//! Datagrams arriving on the host socket are handed to the
//! [`UdpForwarder`] dependency for injection into the Thread stack; datagrams
//! leaving the stack are sent to their IPv6 peer with a fixed hop limit.

use std::cell::RefCell;
use std::mem;
use std::net::Ipv6Addr;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use log::{debug, info, warn};
use nix::errno::Errno;

use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::{MainloopContext, MainloopProcessor};
use crate::net;

const MAX_UDP_SIZE: usize = 1280;
const IP6_HOP_LIMIT: libc::c_int = 64;

/// Receives datagrams from the host socket for injection into the Thread
/// stack. The proxy itself never touches the stack.
pub trait UdpForwarder {
    fn udp_forward(&mut self, payload: &[u8], remote_addr: Ipv6Addr, remote_port: u16, proxy: &UdpProxy);
}

pub struct UdpProxy {
    fd: RawFd,
    host_port: u16,
    thread_port: u16,
    deps: Rc<RefCell<dyn UdpForwarder>>,
}

impl UdpProxy {
    pub fn new(deps: Rc<RefCell<dyn UdpForwarder>>) -> Self {
        UdpProxy {
            fd: -1,
            host_port: 0,
            thread_port: 0,
            deps,
        }
    }

    pub fn is_started(&self) -> bool {
        self.host_port != 0
    }

    /// Ephemeral UDP port bound on the host, 0 when stopped.
    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    /// Proxied UDP port on the Thread side, 0 when stopped.
    pub fn thread_port(&self) -> u16 {
        self.thread_port
    }

    /// Starts proxying for Thread-side port `port`; no-op when started.
    pub fn start(&mut self, port: u16) {
        if self.is_started() {
            return;
        }
        if let Err(err) = self.bind_to_ephemeral_port() {
            warn!("Failed to bind UDP proxy to an ephemeral port: {err}");
            self.stop();
            return;
        }
        self.thread_port = port;
    }

    pub fn stop(&mut self) {
        self.host_port = 0;
        self.thread_port = 0;
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }

    /// Sends one datagram from the host socket to the peer with a fixed hop
    /// limit. Failures are logged and discarded; a stopped proxy is a silent
    /// no-op.
    pub fn send_to_peer(&self, payload: &[u8], peer_addr: Ipv6Addr, peer_port: u16) {
        if !self.is_started() || self.fd < 0 {
            return;
        }

        let mut sockaddr = unsafe { mem::zeroed::<libc::sockaddr_in6>() };
        sockaddr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        sockaddr.sin6_port = peer_port.to_be();
        sockaddr.sin6_addr.s6_addr = peer_addr.octets();

        let mut iov = libc::iovec {
            iov_base: payload.as_ptr() as *mut libc::c_void,
            iov_len: payload.len(),
        };

        let mut control = [0u8; 64];
        let mut msg = unsafe { mem::zeroed::<libc::msghdr>() };
        msg.msg_name = &mut sockaddr as *mut _ as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;

        let rval = unsafe {
            msg.msg_controllen = libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as u32) as _;

            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg).cmsg_type = libc::IPV6_HOPLIMIT;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::c_int>() as u32) as _;
            std::ptr::copy_nonoverlapping(
                &IP6_HOP_LIMIT as *const libc::c_int as *const u8,
                libc::CMSG_DATA(cmsg),
                mem::size_of::<libc::c_int>(),
            );

            libc::sendmsg(self.fd, &msg, 0)
        };

        if rval == -1 {
            warn!("Failed to sendmsg: {}", Errno::last());
        }
    }

    fn bind_to_ephemeral_port(&mut self) -> Result<()> {
        self.fd = net::udp6_socket().map_err(Error::from)?;

        let mut sockaddr = unsafe { mem::zeroed::<libc::sockaddr_in6>() };
        sockaddr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        // in6addr_any and port 0: let the OS pick the ephemeral port.

        let rval = unsafe {
            libc::bind(
                self.fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        };
        if rval != 0 {
            return Err(errno_error("bind"));
        }

        let on: libc::c_int = 1;
        for option in [libc::IPV6_RECVHOPLIMIT, libc::IPV6_RECVPKTINFO] {
            let rval = unsafe {
                libc::setsockopt(
                    self.fd,
                    libc::IPPROTO_IPV6,
                    option,
                    &on as *const _ as *const libc::c_void,
                    mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if rval != 0 {
                return Err(errno_error("setsockopt"));
            }
        }

        let mut bound = unsafe { mem::zeroed::<libc::sockaddr_in6>() };
        let mut len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        let rval = unsafe {
            libc::getsockname(
                self.fd,
                &mut bound as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rval != 0 {
            return Err(errno_error("getsockname"));
        }

        self.host_port = u16::from_be(bound.sin6_port);
        info!("UDP proxy bound to ephemeral port {}", self.host_port);
        Ok(())
    }

    fn receive_packet(&self) -> Option<(Vec<u8>, Ipv6Addr, u16)> {
        let mut payload = [0u8; MAX_UDP_SIZE];
        let mut control = [0u8; MAX_UDP_SIZE];
        let mut peer = unsafe { mem::zeroed::<libc::sockaddr_in6>() };

        let mut iov = libc::iovec {
            iov_base: payload.as_mut_ptr() as *mut libc::c_void,
            iov_len: payload.len(),
        };

        let mut msg = unsafe { mem::zeroed::<libc::msghdr>() };
        msg.msg_name = &mut peer as *mut _ as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = control.len() as _;

        let rval = unsafe { libc::recvmsg(self.fd, &mut msg, 0) };
        if rval <= 0 {
            let errno = Errno::last();
            if rval < 0 && errno != Errno::EAGAIN && errno != Errno::EWOULDBLOCK {
                warn!("Failed to recvmsg: {errno}");
            }
            return None;
        }

        let remote_addr = Ipv6Addr::from(peer.sin6_addr.s6_addr);
        let remote_port = u16::from_be(peer.sin6_port);
        debug!(
            "Received a packet of {rval} bytes from [{remote_addr}]:{remote_port}"
        );

        Some((payload[..rval as usize].to_vec(), remote_addr, remote_port))
    }
}

impl MainloopProcessor for UdpProxy {
    fn update(&mut self, context: &mut MainloopContext) {
        if self.fd >= 0 && self.is_started() {
            context.add_fd_to_read_set(self.fd);
        }
    }

    fn process(&mut self, context: &MainloopContext) {
        if self.fd < 0 || !self.is_started() || !context.is_fd_readable(self.fd) {
            return;
        }

        if let Some((payload, remote_addr, remote_port)) = self.receive_packet() {
            let deps = self.deps.clone();
            deps.borrow_mut()
                .udp_forward(&payload, remote_addr, remote_port, self);
        }
    }
}

impl Drop for UdpProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

fn errno_error(what: &str) -> Error {
    Error::new(ErrorKind::Generic, format!("{what}: {}", Errno::last()))
}
