//! DHCP transport: per-interface listeners and reply serialization.
//!
//! The session controller only sees [`DhcpTransport`] and [`DhcpSender`].
//! [`UdpTransport`] is the implementation used by the binary: one UDP socket
//! on port 67 per interface, bound to the device, with a receive task that
//! parses packets and queues them for the interface's dispatcher.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Ipv4Lease;
use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType};
use crate::packet::{BOOTREQUEST, DhcpPacket};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// Packets queued between a listener and its dispatcher.
const INCOMING_QUEUE_SIZE: usize = 256;

/// Positive replies a session can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Offer,
    Ack,
}

impl From<ReplyKind> for MessageType {
    fn from(kind: ReplyKind) -> Self {
        match kind {
            ReplyKind::Offer => MessageType::Offer,
            ReplyKind::Ack => MessageType::Ack,
        }
    }
}

/// Serializes and sends replies on one interface. Must not block.
pub trait DhcpSender: Send + Sync {
    fn send(
        &self,
        kind: ReplyKind,
        in_reply_to: &DhcpPacket,
        lease: &Ipv4Lease,
        lease_seconds: u32,
    ) -> Result<()>;

    fn send_negative_ack(&self, in_reply_to: &DhcpPacket) -> Result<()>;
}

/// A bound interface: where replies go and where requests come from.
pub struct Listener {
    pub sender: Arc<dyn DhcpSender>,
    pub incoming: mpsc::Receiver<DhcpPacket>,
}

pub trait DhcpTransport: Send + Sync {
    fn create_listener(&self, ifname: &str, ifindex: u32) -> Result<Listener>;
}

fn relay_echo(request: &DhcpPacket, options: &mut Vec<DhcpOption>) {
    if let Some(relay_info) = request.relay_agent_info() {
        options.push(DhcpOption::RelayAgentInfo(relay_info.to_vec()));
    }
}

/// Builds an OFFER or ACK for `lease`.
pub fn build_reply(
    kind: ReplyKind,
    request: &DhcpPacket,
    lease: &Ipv4Lease,
    lease_seconds: u32,
) -> DhcpPacket {
    let mut options = vec![
        DhcpOption::ServerIdentifier(lease.addr),
        DhcpOption::LeaseTime(lease_seconds),
        DhcpOption::SubnetMask(lease.subnet_mask()),
        DhcpOption::Router(vec![lease.addr]),
    ];
    relay_echo(request, &mut options);

    DhcpPacket::create_reply(request, kind.into(), lease.peer_addr, lease.addr, options)
}

pub fn build_nak(request: &DhcpPacket) -> DhcpPacket {
    let mut options = Vec::new();
    relay_echo(request, &mut options);

    DhcpPacket::create_reply(
        request,
        MessageType::Nak,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        options,
    )
}

/// Relayed requests are answered through the relay, everything else is
/// broadcast on the access interface.
pub fn reply_destination(request: &DhcpPacket) -> SocketAddr {
    if !request.giaddr.is_unspecified() {
        SocketAddr::new(IpAddr::V4(request.giaddr), DHCP_SERVER_PORT)
    } else {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
    }
}

/// UDP transport used outside of tests.
#[derive(Debug, Default)]
pub struct UdpTransport;

impl UdpTransport {
    fn create_socket(ifname: &str) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        socket.bind_device(Some(ifname.as_bytes())).map_err(|error| {
            Error::Socket(format!("Failed to bind to device {}: {}", ifname, error))
        })?;

        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        warn!(
            "binding to device {} is not supported on this platform, listening on all interfaces",
            ifname
        );

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })
    }
}

impl DhcpTransport for UdpTransport {
    fn create_listener(&self, ifname: &str, ifindex: u32) -> Result<Listener> {
        let socket = Arc::new(Self::create_socket(ifname)?);
        let (tx, incoming) = mpsc::channel(INCOMING_QUEUE_SIZE);

        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            ifname.to_string(),
            tx,
        ));

        info!(ifname, ifindex, "DHCP listener ready");

        Ok(Listener {
            sender: Arc::new(UdpSender { socket, receiver }),
            incoming,
        })
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, ifname: String, tx: mpsc::Sender<DhcpPacket>) {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        let (size, source) = match socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(error) => {
                error!(ifname = %ifname, "Error receiving packet: {}", error);
                continue;
            }
        };

        let packet = match DhcpPacket::parse(&buffer[..size]) {
            Ok(packet) if packet.op == BOOTREQUEST => packet,
            Ok(_) => continue,
            Err(error) => {
                debug!(ifname = %ifname, %source, "dropping packet: {}", error);
                continue;
            }
        };

        match tx.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(ifname = %ifname, "incoming queue full, dropping packet from {}", source);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

struct UdpSender {
    socket: Arc<UdpSocket>,
    receiver: JoinHandle<()>,
}

impl UdpSender {
    fn transmit(&self, reply: &DhcpPacket, request: &DhcpPacket) -> Result<()> {
        let destination = reply_destination(request);
        self.socket.try_send_to(&reply.encode(), destination)?;
        Ok(())
    }
}

impl DhcpSender for UdpSender {
    fn send(
        &self,
        kind: ReplyKind,
        in_reply_to: &DhcpPacket,
        lease: &Ipv4Lease,
        lease_seconds: u32,
    ) -> Result<()> {
        self.transmit(
            &build_reply(kind, in_reply_to, lease, lease_seconds),
            in_reply_to,
        )
    }

    fn send_negative_ack(&self, in_reply_to: &DhcpPacket) -> Result<()> {
        self.transmit(&build_nak(in_reply_to), in_reply_to)
    }
}

impl Drop for UdpSender {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}
