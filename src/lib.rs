//! Thread Border Router agent core for Rust.
//!
//! This library bridges a Thread mesh (behind a Radio Co-Processor) and a
//! conventional IP network. It provides the single-threaded cooperative
//! reactor, the Thread host state machine, the DNS-SD advertising/proxy
//! layer, the D-Bus server object and the UDP proxy; the Thread stack and a
//! concrete mDNS daemon binding are external collaborators behind the
//! [`ot::InstanceInterface`] and [`dnssd::Publisher`] traits.
//!
//! # Example
//!
//! ```no_run
//! use otbr_agent_rs::agent::{AgentConfig, Application};
//!
//! # fn main() -> otbr_agent_rs::Result<()> {
//! let mut app = Application::new(AgentConfig {
//!     interface_name: "wpan0".to_owned(),
//!     dry_run: true,
//!     ..AgentConfig::default()
//! })
//! .map_err(otbr_agent_rs::Error::from)?;
//!
//! app.init()?;
//! app.run()?;
//! # Ok(())
//! # }
//! ```

pub mod advertising_proxy;
pub mod agent;
pub mod border_agent;
pub mod dbus;
pub mod dnssd;
pub mod error;
pub mod mainloop;
pub mod net;
pub mod ot;
pub mod rcp_host;
pub mod task_runner;
pub mod thread_helper;
pub mod udp_proxy;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::mainloop::{MainloopContext, MainloopManager, MainloopProcessor};
pub use crate::rcp_host::{NetworkProperties, RcpHost, ThreadEnabledState};
pub use crate::task_runner::TaskRunner;
