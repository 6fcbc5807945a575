#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use ipoe::backend::{AllowAll, RangePool};
use ipoe::session::SessionId;
use ipoe::transport::{build_nak, build_reply};
use ipoe::{
    AuthOutcome, Authenticator, Backends, Config, DhcpOption, DhcpPacket, DhcpSender,
    DhcpTransport, Ipv4Lease, Listener, MessageType, Registry, ReplyKind, Result, Service,
    SessionEvent, SessionFramework, SessionInfo, TerminateReason, UsernameProvider,
};

pub const IFNAME: &str = "eth0";
pub const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const FIRST_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const RELAY: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
pub const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const OTHER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

/// Records every reply as the packet that would have gone on the wire.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<DhcpPacket>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<DhcpPacket> {
        self.sent.lock().unwrap().clone()
    }

    pub fn message_types(&self) -> Vec<MessageType> {
        self.sent()
            .iter()
            .filter_map(DhcpPacket::message_type)
            .collect()
    }
}

impl DhcpSender for RecordingSender {
    fn send(
        &self,
        kind: ReplyKind,
        in_reply_to: &DhcpPacket,
        lease: &Ipv4Lease,
        lease_seconds: u32,
    ) -> Result<()> {
        let reply = build_reply(kind, in_reply_to, lease, lease_seconds);
        self.sent.lock().unwrap().push(reply);
        Ok(())
    }

    fn send_negative_ack(&self, in_reply_to: &DhcpPacket) -> Result<()> {
        self.sent.lock().unwrap().push(build_nak(in_reply_to));
        Ok(())
    }
}

/// Hands out listeners whose incoming side the test can feed.
pub struct FakeTransport {
    pub sender: Arc<RecordingSender>,
    inputs: Mutex<Vec<(String, mpsc::Sender<DhcpPacket>)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(RecordingSender::default()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn input(&self, ifname: &str) -> mpsc::Sender<DhcpPacket> {
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(name, _)| name == ifname)
            .map(|(_, tx)| tx.clone())
            .unwrap()
    }

    pub fn listeners_created(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

impl DhcpTransport for FakeTransport {
    fn create_listener(&self, ifname: &str, _ifindex: u32) -> Result<Listener> {
        let (tx, incoming) = mpsc::channel(16);
        self.inputs.lock().unwrap().push((ifname.to_string(), tx));
        Ok(Listener {
            sender: self.sender.clone(),
            incoming,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub session: SessionId,
    pub event: SessionEvent,
    pub username: Option<String>,
}

pub struct RecordingFramework {
    events: Mutex<Vec<Recorded>>,
    allow_activation: AtomicBool,
}

impl RecordingFramework {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            allow_activation: AtomicBool::new(true),
        }
    }

    pub fn reject_activation(&self) {
        self.allow_activation.store(false, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<(SessionId, TerminateReason)> {
        self.events()
            .into_iter()
            .filter_map(|recorded| match recorded.event {
                SessionEvent::Finished(reason) => Some((recorded.session, reason)),
                _ => None,
            })
            .collect()
    }
}

impl SessionFramework for RecordingFramework {
    fn notify(&self, event: SessionEvent, session: &SessionInfo) {
        self.events.lock().unwrap().push(Recorded {
            session: session.id,
            event,
            username: session.username.clone(),
        });
    }

    fn activate(&self, _session: &SessionInfo) -> bool {
        self.allow_activation.load(Ordering::SeqCst)
    }
}

/// Answers every check with a fixed outcome and password.
pub struct FixedAuthenticator {
    pub outcome: AuthOutcome,
    pub password: Option<String>,
}

impl Authenticator for FixedAuthenticator {
    fn check(&self, _session: &SessionInfo, _username: &str) -> AuthOutcome {
        self.outcome
    }

    fn retrieve_password(&self, _session: &SessionInfo, _username: &str) -> Option<String> {
        self.password.clone()
    }
}

/// Names sessions `<function>-<mac>`.
pub struct MacUsername;

impl UsernameProvider for MacUsername {
    fn username(&self, function: &str, session: &SessionInfo) -> Option<String> {
        Some(format!("{}-{}", function, session.calling_station_id))
    }
}

pub struct Harness {
    pub registry: Registry,
    pub transport: Arc<FakeTransport>,
    pub framework: Arc<RecordingFramework>,
    pub pool: Arc<RangePool>,
}

impl Harness {
    pub fn sender(&self) -> &RecordingSender {
        &self.transport.sender
    }

    pub async fn bind(&self, options: &str) -> Arc<Service> {
        self.registry.bind(IFNAME, 2, options).await.unwrap()
    }
}

pub fn test_config() -> Config {
    Config {
        pool_start: FIRST_ADDR,
        pool_end: Ipv4Addr::new(10, 0, 0, 20),
        pool_gateway: GATEWAY,
        ..Config::default()
    }
}

pub struct HarnessBuilder {
    pub config: Config,
    pub authenticator: Arc<dyn Authenticator>,
    pub username_provider: Option<Arc<dyn UsernameProvider>>,
    pub pool: Arc<RangePool>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            authenticator: Arc::new(AllowAll),
            username_provider: None,
            pool: Arc::new(RangePool::new(FIRST_ADDR, Ipv4Addr::new(10, 0, 0, 20), GATEWAY)),
        }
    }

    pub fn build(self) -> Harness {
        let transport = Arc::new(FakeTransport::new());
        let framework = Arc::new(RecordingFramework::new());
        let backends = Backends {
            authenticator: self.authenticator,
            pool: self.pool.clone(),
            framework: framework.clone(),
            username_provider: self.username_provider,
        };
        let registry =
            Registry::new(&self.config, backends, transport.clone()).unwrap();
        Harness {
            registry,
            transport,
            framework,
            pool: self.pool,
        }
    }
}

pub fn discover(xid: u32, mac: [u8; 6]) -> DhcpPacket {
    DhcpPacket::new_request(MessageType::Discover, mac, xid)
}

pub fn request(xid: u32, mac: [u8; 6], server: Ipv4Addr, requested: Ipv4Addr) -> DhcpPacket {
    let mut packet = DhcpPacket::new_request(MessageType::Request, mac, xid);
    packet.options.push(DhcpOption::ServerIdentifier(server));
    packet.options.push(DhcpOption::RequestedIpAddress(requested));
    packet
}

pub fn message(message_type: MessageType, xid: u32, mac: [u8; 6]) -> DhcpPacket {
    DhcpPacket::new_request(message_type, mac, xid)
}

pub fn relayed(mut packet: DhcpPacket, circuit_id: Option<&[u8]>) -> DhcpPacket {
    packet.giaddr = RELAY;
    if let Some(circuit_id) = circuit_id {
        let mut info = vec![1, circuit_id.len() as u8];
        info.extend_from_slice(circuit_id);
        packet.options.push(DhcpOption::RelayAgentInfo(info));
    }
    packet
}

/// Lets spawned tasks run until they are idle. Advances the paused clock
/// by a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Runs DISCOVER and REQUEST for `xid`/`mac`, leaving the session Active.
pub async fn activate(service: &Arc<Service>, xid: u32, mac: [u8; 6]) {
    service.dispatch(discover(xid, mac)).await;
    settle().await;
    service
        .dispatch(request(xid, mac, GATEWAY, FIRST_ADDR))
        .await;
    settle().await;
}
