//! Per-client session state machine.
//!
//! Each session runs as its own task and is the only writer of its state:
//! `Created -> Starting -> Active -> Terminated`, never backwards. The
//! dispatcher talks to it through a [`SessionHandle`], which carries the
//! session's correlation key, a watch on its published status, and a small
//! command queue. The dispatcher only enqueues; it never waits on a session.
//!
//! Teardown runs exactly once, when the task leaves its command loop:
//! cancel the timer, drop the pending request, unregister from the service
//! (under the service lock), then give the lease back and fire the finished
//! notification.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::backend::{AuthOutcome, Ipv4Lease, SessionEvent};
use crate::config::{Config, UsernameSource};
use crate::error::Result;
use crate::key::CorrelationKey;
use crate::options::MessageType;
use crate::packet::{DhcpPacket, format_mac};
use crate::service::{Service, Shared};
use crate::timer::{SessionTimer, TimerKind};
use crate::transport::{DhcpSender, ReplyKind};

/// Commands queued per session; a session needs at most an activation and
/// a termination in flight.
const COMMAND_QUEUE_SIZE: usize = 4;

/// Prefix length used when neither the pool nor the configuration sets one.
const DEFAULT_PREFIX_LEN: u8 = 24;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    #[default]
    Created,
    Starting,
    Active,
    Terminated,
}

/// Why a session ended. Delivered with [`SessionEvent::Finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// The offer or lease timer expired.
    LostCarrier,
    /// The client released, declined, or asked for an address it was not given.
    UserRequest,
    /// Operator action or interface shutdown.
    AdminReset,
    /// Authentication denied or no address could be allocated.
    AuthError,
    /// The session framework refused activation.
    NasError,
}

impl std::fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::LostCarrier => "lost carrier",
            Self::UserRequest => "user request",
            Self::AdminReset => "admin reset",
            Self::AuthError => "authentication error",
            Self::NasError => "NAS error",
        };
        f.write_str(reason)
    }
}

/// Identity of a session as seen by the backends.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub ifname: String,
    /// The bound access interface.
    pub called_station_id: String,
    /// Client hardware address, `aa:bb:cc:dd:ee:ff`.
    pub calling_station_id: String,
    pub username: Option<String>,
    pub key: CorrelationKey,
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(id: SessionId, ifname: &str, key: CorrelationKey) -> Self {
        Self {
            id,
            ifname: ifname.to_string(),
            called_station_id: ifname.to_string(),
            calling_station_id: format_mac(&key.hwaddr),
            username: None,
            key,
            created_at: Utc::now(),
        }
    }
}

/// What a session publishes about itself after every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub lease: Option<Ipv4Lease>,
    pub timer: Option<TimerKind>,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub key: CorrelationKey,
    pub status: SessionStatus,
    pub pending_request: bool,
}

/// Session parameters resolved once from the configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub username: UsernameSource,
    pub offer_timeout: Duration,
    pub lease_timeout: Duration,
    pub lease_time: u32,
    pub gw_address: Option<Ipv4Addr>,
    pub netmask: Option<u8>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            username: config.username_source()?,
            offer_timeout: config.offer_timeout(),
            lease_timeout: config.lease_timeout(),
            lease_time: config.lease_time_seconds,
            gw_address: config.gw_address,
            netmask: config.netmask,
        })
    }
}

#[derive(Debug)]
enum Command {
    Activate(DhcpPacket),
    Terminate { reason: TerminateReason, hard: bool },
}

/// The service's view of one session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    key: CorrelationKey,
    status: watch::Receiver<SessionStatus>,
    pending: Arc<AtomicBool>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            key: self.key.clone(),
            status: self.status(),
            pending_request: self.has_pending_request(),
        }
    }

    /// Hands `request` to the session for activation.
    ///
    /// Returns false, dropping the request, if one is already pending or
    /// the session stopped accepting commands.
    pub(crate) fn attach_request(&self, request: DhcpPacket) -> bool {
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if self.commands.try_send(Command::Activate(request)).is_err() {
            self.pending.store(false, Ordering::Release);
            return false;
        }

        true
    }

    /// Asks the session to terminate. Safe to call any number of times.
    pub(crate) fn terminate(&self, reason: TerminateReason, hard: bool) {
        if let Err(error) = self.commands.try_send(Command::Terminate { reason, hard }) {
            debug!(session = self.id, "terminate not queued: {}", error);
        }
    }

    pub(crate) fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Spawns a session for `request` on `service`.
///
/// Must be called with the service's session collection locked, so the
/// handle is registered before the session could try to remove itself.
pub(crate) fn spawn(
    service: &Arc<Service>,
    id: SessionId,
    key: CorrelationKey,
    request: DhcpPacket,
) -> SessionHandle {
    let info = SessionInfo::new(id, service.ifname(), key.clone());
    let pending = Arc::new(AtomicBool::new(true));
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);

    let span = info_span!(
        "session",
        id,
        ifname = %info.ifname,
        mac = %info.calling_station_id
    );

    let context = SessionContext {
        info,
        service: Arc::downgrade(service),
        shared: Arc::clone(service.shared()),
        sender: Arc::clone(service.sender()),
        state: SessionState::Created,
        lease: None,
        request: Some(request),
        pending: Arc::clone(&pending),
        timer: SessionTimer::new(),
        status: status_tx,
        finish: None,
    };

    let task = tokio::spawn(context.run(commands_rx).instrument(span));

    SessionHandle {
        id,
        key,
        status: status_rx,
        pending,
        commands: commands_tx,
        task,
    }
}

struct SessionContext {
    info: SessionInfo,
    service: Weak<Service>,
    shared: Arc<Shared>,
    sender: Arc<dyn DhcpSender>,
    state: SessionState,
    lease: Option<Ipv4Lease>,
    request: Option<DhcpPacket>,
    pending: Arc<AtomicBool>,
    timer: SessionTimer,
    status: watch::Sender<SessionStatus>,
    finish: Option<TerminateReason>,
}

impl SessionContext {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.take_early_termination(&mut commands);
        if self.finish.is_none() {
            self.start();
        }

        while self.finish.is_none() {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Activate(request)) => self.activate(request),
                    Some(Command::Terminate { reason, hard }) => self.terminate(reason, hard),
                    None => self.terminate(TerminateReason::AdminReset, true),
                },
                kind = self.timer.expired() => {
                    info!(timer = %kind, "session timed out");
                    self.terminate(TerminateReason::LostCarrier, false);
                }
            }
        }

        self.teardown().await;
    }

    /// Picks up a termination queued before the task first ran, so a client
    /// that already gave up is never offered an address.
    fn take_early_termination(&mut self, commands: &mut mpsc::Receiver<Command>) {
        loop {
            match commands.try_recv() {
                Ok(Command::Terminate { reason, hard }) => self.terminate(reason, hard),
                Ok(Command::Activate(_)) => {
                    debug!("ignoring activation before start");
                    self.pending.store(false, Ordering::Release);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.terminate(TerminateReason::AdminReset, true);
                    break;
                }
            }
        }
    }

    fn start(&mut self) {
        let Some(username) = self.derive_username() else {
            warn!("failed to derive username");
            self.terminate(TerminateReason::AuthError, false);
            return;
        };
        self.info.username = Some(username.clone());

        let framework = Arc::clone(&self.shared.backends.framework);
        framework.notify(SessionEvent::Starting, &self.info);
        framework.notify(SessionEvent::Started, &self.info);

        self.state = SessionState::Starting;
        self.shared.stats.session_starting();
        self.publish();

        if !self.authenticate(&username) {
            warn!(username = %username, "authentication failed");
            self.terminate(TerminateReason::AuthError, false);
            return;
        }

        if let Some(request) = self.request.take() {
            // No separate reason exists for an exhausted pool.
            let Some(lease) = self.allocate() else {
                warn!("no free IPv4 address");
                self.terminate(TerminateReason::AuthError, false);
                return;
            };
            self.lease = Some(lease);
            self.publish();
            self.reply(ReplyKind::Offer, &request, &lease);
        }

        self.pending.store(false, Ordering::Release);
        self.timer
            .arm(TimerKind::Offer, self.shared.settings.offer_timeout);
        self.publish();
    }

    fn derive_username(&self) -> Option<String> {
        let username = match &self.shared.settings.username {
            UsernameSource::InterfaceName => Some(self.info.ifname.clone()),
            UsernameSource::External(function) => self
                .shared
                .backends
                .username_provider
                .as_ref()?
                .username(function, &self.info),
        };
        username.filter(|name| !name.is_empty())
    }

    fn authenticate(&self, username: &str) -> bool {
        let authenticator = &self.shared.backends.authenticator;
        match authenticator.check(&self.info, username) {
            AuthOutcome::Granted => true,
            AuthOutcome::Denied => false,
            AuthOutcome::NoOpinion => authenticator
                .retrieve_password(&self.info, username)
                .is_some(),
        }
    }

    fn allocate(&self) -> Option<Ipv4Lease> {
        let mut lease = self.shared.backends.pool.allocate(&self.info)?;
        let settings = &self.shared.settings;

        if let Some(gw_address) = settings.gw_address {
            lease.addr = gw_address;
        }

        match settings.netmask {
            Some(netmask) => lease.mask = netmask,
            None if lease.mask == 0 => lease.mask = DEFAULT_PREFIX_LEN,
            None => {}
        }

        Some(lease)
    }

    fn activate(&mut self, request: DhcpPacket) {
        if self.state != SessionState::Starting {
            debug!(state = ?self.state, "ignoring activation");
            self.pending.store(false, Ordering::Release);
            return;
        }

        self.timer.cancel();

        let framework = Arc::clone(&self.shared.backends.framework);
        match self.lease {
            Some(lease) if framework.activate(&self.info) => {
                self.state = SessionState::Active;
                self.shared.stats.session_activated();
                self.timer
                    .arm(TimerKind::Lease, self.shared.settings.lease_timeout);
                self.publish();
                self.reply(ReplyKind::Ack, &request, &lease);
                info!(peer_addr = %lease.peer_addr, "session activated");
            }
            _ => {
                warn!("activation rejected");
                if let Err(error) = self.sender.send_negative_ack(&request) {
                    warn!("failed to send {}: {}", MessageType::Nak, error);
                }
                self.terminate(TerminateReason::NasError, false);
            }
        }

        drop(request);
        self.pending.store(false, Ordering::Release);
    }

    fn reply(&self, kind: ReplyKind, request: &DhcpPacket, lease: &Ipv4Lease) {
        if let Err(error) = self
            .sender
            .send(kind, request, lease, self.shared.settings.lease_time)
        {
            warn!("failed to send {}: {}", MessageType::from(kind), error);
        }
    }

    // IPoE has no link to bring down, so hard and soft termination finish alike.
    fn terminate(&mut self, reason: TerminateReason, hard: bool) {
        if self.finish.is_some() {
            return;
        }
        debug!(%reason, hard, "terminating");
        self.finish = Some(reason);
    }

    async fn teardown(mut self) {
        let reason = self.finish.unwrap_or(TerminateReason::AdminReset);

        self.timer.cancel();
        self.request = None;
        self.pending.store(false, Ordering::Release);

        if let Some(service) = self.service.upgrade() {
            service.remove(self.info.id).await;
        }

        if let Some(lease) = self.lease.take() {
            self.shared.backends.pool.release(&self.info, &lease);
        }

        let reached_starting = match self.state {
            SessionState::Starting => {
                self.shared.stats.starting_finished();
                true
            }
            SessionState::Active => {
                self.shared.stats.active_finished();
                true
            }
            SessionState::Created | SessionState::Terminated => false,
        };

        self.state = SessionState::Terminated;
        self.publish();

        if reached_starting {
            self.shared
                .backends
                .framework
                .notify(SessionEvent::Finished(reason), &self.info);
        }

        let duration = Utc::now() - self.info.created_at;
        info!(%reason, duration = duration.num_seconds(), "session terminated");
    }

    fn publish(&self) {
        self.status.send_replace(SessionStatus {
            state: self.state,
            lease: self.lease,
            timer: self.timer.armed(),
        });
    }
}
