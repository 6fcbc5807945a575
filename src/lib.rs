//! # ipoe
//!
//! Session control for an IP-over-Ethernet access concentrator. DHCP traffic
//! seen on bound interfaces creates, activates and tears down client
//! sessions; each session is a small state machine with its own address
//! lease and timer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ipoe::{Backends, Config, Registry, UdpTransport};
//!
//! #[tokio::main]
//! async fn main() -> ipoe::Result<()> {
//!     let config = Config::load_or_create("ipoe.json")?;
//!     let backends = Backends::from_config(&config);
//!     let registry = Registry::new(&config, backends, Arc::new(UdpTransport))?;
//!     registry.reconcile(&config.interfaces).await;
//!     tokio::signal::ctrl_c().await?;
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Registry`] - bound interfaces, keyed by name
//! - [`Service`] - one interface: its sessions, their lookup and dispatch
//! - [`session`] - the per-client state machine, run as its own task
//! - [`CorrelationKey`] - which session a DHCP message belongs to
//! - [`backend`] - authentication, address pool and session framework contracts
//! - [`transport`] - listener and reply sender contracts, plus a UDP implementation
//! - [`DhcpPacket`] - DHCP packet parsing and encoding

pub mod backend;
pub mod config;
mod dispatch;
pub mod error;
pub mod key;
pub mod options;
pub mod packet;
pub mod registry;
pub mod service;
pub mod session;
pub mod stats;
pub mod timer;
pub mod transport;

pub use backend::{
    AddressPool, AuthOutcome, Authenticator, Backends, Ipv4Lease, SessionEvent, SessionFramework,
    UsernameProvider,
};
pub use config::{Config, InterfaceConfig};
pub use error::{Error, Result};
pub use key::CorrelationKey;
pub use options::{DhcpOption, MessageType};
pub use packet::DhcpPacket;
pub use registry::Registry;
pub use service::Service;
pub use session::{SessionInfo, SessionSnapshot, SessionState, SessionStatus, TerminateReason};
pub use stats::StatsSnapshot;
pub use timer::TimerKind;
pub use transport::{DhcpSender, DhcpTransport, Listener, ReplyKind, UdpTransport};
