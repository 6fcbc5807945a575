//! One bound interface and the sessions created on it.
//!
//! The session collection is a map keyed by session id, guarded by a tokio
//! mutex. Lookup, creation and removal all happen under that lock; nothing
//! else does. The dispatcher holds it across lookup and the synchronous part
//! of its reaction, sessions take it once, to remove themselves.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::backend::Backends;
use crate::config::{Config, InterfaceOptions};
use crate::error::Result;
use crate::key::CorrelationKey;
use crate::packet::DhcpPacket;
use crate::session::{
    self, SessionHandle, SessionId, SessionSettings, SessionSnapshot, TerminateReason,
};
use crate::stats::Stats;
use crate::transport::{DhcpSender, Listener};

pub(crate) type Sessions = BTreeMap<SessionId, SessionHandle>;

/// State shared by every service and session of a registry.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) settings: SessionSettings,
    pub(crate) backends: Backends,
    pub(crate) stats: Arc<Stats>,
    pub(crate) max_sessions: Option<usize>,
    pub(crate) verbose: bool,
    next_session_id: AtomicU64,
}

impl Shared {
    pub(crate) fn new(config: &Config, backends: Backends) -> Result<Self> {
        Ok(Self {
            settings: SessionSettings::from_config(config)?,
            backends,
            stats: Arc::new(Stats::new()),
            max_sessions: config.max_sessions_per_interface,
            verbose: config.verbose,
            next_session_id: AtomicU64::new(1),
        })
    }

    fn next_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct Service {
    ifname: String,
    ifindex: AtomicU32,
    single: AtomicBool,
    active: AtomicBool,
    sessions: Mutex<Sessions>,
    sender: Arc<dyn DhcpSender>,
    shared: Arc<Shared>,
    receiver: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("ifname", &self.ifname)
            .field("ifindex", &self.ifindex())
            .field("single", &self.is_single())
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Creates the service and starts feeding `listener` into
    /// [`dispatch`](Service::dispatch).
    pub(crate) fn start(
        ifname: &str,
        ifindex: u32,
        options: InterfaceOptions,
        listener: Listener,
        shared: Arc<Shared>,
    ) -> Arc<Self> {
        let Listener { sender, incoming } = listener;

        let service = Arc::new(Self {
            ifname: ifname.to_string(),
            ifindex: AtomicU32::new(ifindex),
            single: AtomicBool::new(options.single),
            active: AtomicBool::new(true),
            sessions: Mutex::new(BTreeMap::new()),
            sender,
            shared,
            receiver: StdMutex::new(None),
        });

        let span = info_span!("service", ifname);
        let task = tokio::spawn(receive(Arc::downgrade(&service), incoming).instrument(span));
        *service
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!(ifname, ifindex, single = options.single, "interface bound");
        service
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex.load(Ordering::Relaxed)
    }

    pub fn is_single(&self) -> bool {
        self.single.load(Ordering::Relaxed)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn sender(&self) -> &Arc<dyn DhcpSender> {
        &self.sender
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .lock()
            .await
            .values()
            .map(SessionHandle::snapshot)
            .collect()
    }

    /// Returns the session `packet` correlates to, if any.
    pub async fn find(&self, packet: &DhcpPacket) -> Option<SessionSnapshot> {
        let key = CorrelationKey::from_packet(packet);
        let sessions = self.sessions.lock().await;
        lookup(&sessions, &key).map(SessionHandle::snapshot)
    }

    /// Creates a session for the DISCOVER `request`, unless this interface
    /// is at capacity. The caller holds the session lock.
    pub(crate) fn create_session(
        self: &Arc<Self>,
        sessions: &mut Sessions,
        key: CorrelationKey,
        request: DhcpPacket,
    ) -> Option<SessionId> {
        if self.is_single() && !sessions.is_empty() {
            debug!(ifname = %self.ifname, "single session interface busy, dropping DISCOVER");
            return None;
        }

        if let Some(max) = self.shared.max_sessions
            && sessions.len() >= max
        {
            error!(ifname = %self.ifname, max, "session limit reached, dropping DISCOVER");
            return None;
        }

        let id = self.shared.next_session_id();
        let handle = session::spawn(self, id, key, request);
        sessions.insert(id, handle);
        Some(id)
    }

    /// Unregisters a session. Removing an unknown id is a no-op.
    pub(crate) async fn remove(&self, id: SessionId) {
        if self.sessions.lock().await.remove(&id).is_some() {
            debug!(ifname = %self.ifname, session = id, "session removed");
        }
    }

    /// Asks one session to terminate. Returns false if no such session exists.
    pub async fn terminate_session(&self, id: SessionId, reason: TerminateReason) -> bool {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(&id) {
            return false;
        }
        detach(&mut sessions, id, reason);
        true
    }

    /// Terminates every session and returns their tasks.
    ///
    /// The handles leave the collection immediately, so the sessions find
    /// nothing to remove when they tear down.
    pub(crate) async fn terminate_all(
        &self,
        reason: TerminateReason,
        hard: bool,
    ) -> Vec<JoinHandle<()>> {
        let drained = std::mem::take(&mut *self.sessions.lock().await);
        drained
            .into_values()
            .map(|handle| {
                handle.terminate(reason, hard);
                handle.into_task()
            })
            .collect()
    }

    /// Applies a re-bind of an existing service.
    pub(crate) async fn update(&self, ifindex: u32, options: InterfaceOptions) {
        self.ifindex.store(ifindex, Ordering::Relaxed);
        self.set_active(true);

        let was_single = self.single.swap(options.single, Ordering::Relaxed);
        if options.single && !was_single {
            info!(ifname = %self.ifname, "switching to single session mode");
            join_all(self.terminate_all(TerminateReason::AdminReset, false).await).await;
        }
    }

    /// Stops the receive loop and terminates every session, waiting for
    /// their teardown to finish.
    pub(crate) async fn close(&self) {
        if let Some(task) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let tasks = self.terminate_all(TerminateReason::AdminReset, true).await;
        let count = tasks.len();
        join_all(tasks).await;
        info!(ifname = %self.ifname, sessions = count, "interface unbound");
    }
}

/// First session whose key matches. Iteration order is session id order.
pub(crate) fn lookup<'a>(sessions: &'a Sessions, key: &CorrelationKey) -> Option<&'a SessionHandle> {
    sessions.values().find(|handle| handle.key().matches(key))
}

/// Removes the session with `id` and asks it to terminate.
///
/// Once detached the session can no longer be matched, even though its task
/// is still tearing down; its own removal then finds nothing.
pub(crate) fn detach(sessions: &mut Sessions, id: SessionId, reason: TerminateReason) {
    if let Some(handle) = sessions.remove(&id) {
        handle.terminate(reason, false);
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(error) = task.await
            && error.is_panic()
        {
            warn!("session task panicked: {}", error);
        }
    }
}

async fn receive(service: Weak<Service>, mut incoming: mpsc::Receiver<DhcpPacket>) {
    while let Some(packet) = incoming.recv().await {
        let Some(service) = service.upgrade() else {
            break;
        };
        service.dispatch(packet).await;
    }
    debug!("receive loop finished");
}
