//! Contracts for the collaborators a session talks to, and the in-process
//! implementations the `ipoe` binary runs with.
//!
//! Every call is made from the session's own task and is expected to return
//! quickly; a backend that needs I/O should hand the work off internally.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::config::Config;
use crate::session::{SessionInfo, TerminateReason};

/// Result of an authentication check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted,
    Denied,
    /// The backend has no opinion; the session falls back to a password lookup.
    NoOpinion,
}

pub trait Authenticator: Send + Sync {
    fn check(&self, session: &SessionInfo, username: &str) -> AuthOutcome;

    fn retrieve_password(&self, session: &SessionInfo, username: &str) -> Option<String>;
}

/// An IPv4 address assignment for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Lease {
    /// Gateway side address; sent as server identifier and router.
    pub addr: Ipv4Addr,
    /// Address handed to the client.
    pub peer_addr: Ipv4Addr,
    /// Prefix length.
    pub mask: u8,
}

impl Ipv4Lease {
    pub fn subnet_mask(&self) -> Ipv4Addr {
        match self.mask {
            0 => Ipv4Addr::UNSPECIFIED,
            bits => Ipv4Addr::from(u32::MAX << (32 - u32::from(bits.min(32)))),
        }
    }
}

pub trait AddressPool: Send + Sync {
    fn allocate(&self, session: &SessionInfo) -> Option<Ipv4Lease>;

    /// Returns a lease obtained from [`allocate`](Self::allocate).
    fn release(&self, _session: &SessionInfo, _lease: &Ipv4Lease) {}
}

/// Notifications delivered to the session framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Starting,
    Started,
    Finished(TerminateReason),
}

pub trait SessionFramework: Send + Sync {
    fn notify(&self, event: SessionEvent, session: &SessionInfo);

    /// Asks the framework to activate the session. `false` rejects it.
    fn activate(&self, session: &SessionInfo) -> bool;
}

/// External naming function used by `username = "external:<function>"`.
pub trait UsernameProvider: Send + Sync {
    fn username(&self, function: &str, session: &SessionInfo) -> Option<String>;
}

/// The collaborators shared by every session of a registry.
#[derive(Clone)]
pub struct Backends {
    pub authenticator: Arc<dyn Authenticator>,
    pub pool: Arc<dyn AddressPool>,
    pub framework: Arc<dyn SessionFramework>,
    pub username_provider: Option<Arc<dyn UsernameProvider>>,
}

impl Backends {
    /// Backends that grant every client an address from the configured range.
    pub fn from_config(config: &Config) -> Self {
        Self {
            authenticator: Arc::new(AllowAll),
            pool: Arc::new(RangePool::new(
                config.pool_start,
                config.pool_end,
                config.pool_gateway,
            )),
            framework: Arc::new(LoggingFramework),
            username_provider: None,
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("username_provider", &self.username_provider.is_some())
            .finish_non_exhaustive()
    }
}

/// Grants every username.
#[derive(Debug, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn check(&self, _session: &SessionInfo, _username: &str) -> AuthOutcome {
        AuthOutcome::Granted
    }

    fn retrieve_password(&self, _session: &SessionInfo, _username: &str) -> Option<String> {
        None
    }
}

/// First-free allocator over an inclusive address range.
///
/// The lease mask is left at 0 so the session applies the configured
/// netmask or its /24 fallback.
#[derive(Debug)]
pub struct RangePool {
    gateway: Ipv4Addr,
    start: u32,
    end: u32,
    free: Mutex<BTreeSet<Ipv4Addr>>,
}

impl RangePool {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        let (start, end) = (u32::from(start), u32::from(end));
        let free = (start..=end)
            .map(Ipv4Addr::from)
            .filter(|ip| *ip != gateway)
            .collect();
        Self {
            gateway,
            start,
            end,
            free: Mutex::new(free),
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn contains(&self, ip: Ipv4Addr) -> bool {
        (self.start..=self.end).contains(&u32::from(ip))
    }
}

impl AddressPool for RangePool {
    fn allocate(&self, session: &SessionInfo) -> Option<Ipv4Lease> {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        let peer_addr = free.pop_first()?;
        debug!(session = session.id, %peer_addr, "allocated address");
        Some(Ipv4Lease {
            addr: self.gateway,
            peer_addr,
            mask: 0,
        })
    }

    fn release(&self, session: &SessionInfo, lease: &Ipv4Lease) {
        if !self.contains(lease.peer_addr) {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.insert(lease.peer_addr) {
            debug!(session = session.id, peer_addr = %lease.peer_addr, "released address");
        }
    }
}

/// Logs notifications and activates every session.
#[derive(Debug, Default)]
pub struct LoggingFramework;

impl SessionFramework for LoggingFramework {
    fn notify(&self, event: SessionEvent, session: &SessionInfo) {
        match event {
            SessionEvent::Starting => debug!(session = session.id, "session starting"),
            SessionEvent::Started => info!(
                session = session.id,
                username = session.username.as_deref().unwrap_or(""),
                calling_station_id = %session.calling_station_id,
                "session started"
            ),
            SessionEvent::Finished(reason) => {
                info!(session = session.id, %reason, "session finished")
            }
        }
    }

    fn activate(&self, _session: &SessionInfo) -> bool {
        true
    }
}
