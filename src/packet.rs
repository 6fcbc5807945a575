//! Parsed DHCP packet abstraction and reply construction.
//!
//! A DHCP packet consists of a fixed 236-byte header followed by a 4-byte
//! magic cookie and variable-length options. The session controller only
//! looks at the fields that identify a client (`xid`, `giaddr`, `chaddr`,
//! client-id and relay agent information) and at the addresses a REQUEST
//! asks for; the transport uses [`DhcpPacket::create_reply`] and
//! [`DhcpPacket::encode`] to answer.
//!
//! # References
//!
//! - RFC 2131: Dynamic Host Configuration Protocol

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{
    AGENT_CIRCUIT_ID, AGENT_REMOTE_ID, DhcpOption, MessageType, OptionCode, OverloadFlag,
    relay_sub_option,
};

/// DHCP magic cookie that identifies DHCP packets (vs BOOTP).
const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const DHCP_CHADDR_OFFSET: usize = 28;
const DHCP_SNAME_OFFSET: usize = 44;
const DHCP_FILE_OFFSET: usize = 108;
const DHCP_MAGIC_COOKIE_OFFSET: usize = 236;

/// Size of the fixed header portion including magic cookie.
const DHCP_FIXED_HEADER_SIZE: usize = DHCP_MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Minimum DHCP packet size per RFC 2131 §2.
const DHCP_MIN_PACKET_SIZE: usize = 300;

/// Initial capacity for packet encoding buffer.
const DHCP_ENCODE_CAPACITY: usize = 576;

/// Maximum hop count before dropping the packet.
const MAX_HOPS: u8 = 16;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet.
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet (6 bytes).
pub const HLEN_ETHERNET: u8 = 6;

/// Broadcast bit of the `flags` field.
const FLAG_BROADCAST: u16 = 0x8000;

/// A parsed DHCP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    /// Operation code: [`BOOTREQUEST`] (1) or [`BOOTREPLY`] (2).
    pub op: u8,
    /// Hardware address type. [`HTYPE_ETHERNET`] (1) for Ethernet.
    pub htype: u8,
    /// Hardware address length. [`HLEN_ETHERNET`] (6) for Ethernet.
    pub hlen: u8,
    /// Hop count, incremented by relay agents.
    pub hops: u8,
    /// Transaction ID chosen by client, echoed in replies.
    pub xid: u32,
    /// Seconds elapsed since client began address acquisition.
    pub secs: u16,
    /// Flags. Bit 15 (0x8000) = broadcast flag.
    pub flags: u16,
    /// Client IP address (set by client in RENEWING/REBINDING states).
    pub ciaddr: Ipv4Addr,
    /// "Your" IP address - the address being assigned to the client.
    pub yiaddr: Ipv4Addr,
    /// Server IP address.
    pub siaddr: Ipv4Addr,
    /// Gateway IP address - set by relay agents.
    pub giaddr: Ipv4Addr,
    /// Client hardware address (MAC for Ethernet).
    pub chaddr: [u8; 16],
    /// DHCP options parsed from the packet, including overloaded ones.
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// Builds an empty client request of the given type.
    ///
    /// Useful for tooling and tests that need to feed the dispatcher
    /// without going through the wire format.
    pub fn new_request(message_type: MessageType, hwaddr: [u8; 6], xid: u32) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&hwaddr);
        Self {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid,
            secs: 0,
            flags: FLAG_BROADCAST,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            options: vec![DhcpOption::MessageType(message_type)],
        }
    }

    /// Parses a DHCP packet from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if:
    /// - Packet is shorter than 240 bytes (fixed header + magic cookie)
    /// - Magic cookie is invalid (not 99.130.83.99)
    /// - Hop count exceeds 16 (relay loop protection)
    /// - Hardware length doesn't match type (Ethernet must be 6)
    /// - Options are malformed (truncated length or data)
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < DHCP_FIXED_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                DHCP_FIXED_HEADER_SIZE
            )));
        }

        if data[DHCP_MAGIC_COOKIE_OFFSET..DHCP_FIXED_HEADER_SIZE] != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let (op, htype, hlen, hops) = (data[0], data[1], data[2], data[3]);

        if hops > MAX_HOPS {
            return Err(Error::InvalidPacket(format!(
                "Hop count {} exceeds maximum {}",
                hops, MAX_HOPS
            )));
        }

        if htype == HTYPE_ETHERNET && hlen != HLEN_ETHERNET {
            return Err(Error::InvalidPacket(format!(
                "Invalid hlen {} for Ethernet (expected {})",
                hlen, HLEN_ETHERNET
            )));
        }

        let address_at = |offset: usize| {
            Ipv4Addr::new(
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            )
        };

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[DHCP_CHADDR_OFFSET..DHCP_SNAME_OFFSET]);

        let mut options = Self::parse_options(&data[DHCP_FIXED_HEADER_SIZE..])?;

        let overload = options.iter().find_map(|opt| match opt {
            DhcpOption::OptionOverload(flag) => Some(*flag),
            _ => None,
        });

        if let Some(flag) = overload {
            if matches!(flag, OverloadFlag::File | OverloadFlag::Both) {
                options.extend(Self::parse_options(
                    &data[DHCP_FILE_OFFSET..DHCP_MAGIC_COOKIE_OFFSET],
                )?);
            }
            if matches!(flag, OverloadFlag::Sname | OverloadFlag::Both) {
                options.extend(Self::parse_options(
                    &data[DHCP_SNAME_OFFSET..DHCP_FILE_OFFSET],
                )?);
            }
        }

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: address_at(12),
            yiaddr: address_at(16),
            siaddr: address_at(20),
            giaddr: address_at(24),
            chaddr,
            options,
        })
    }

    fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::InvalidPacket("Option length missing".to_string()));
            }

            let length = data[index + 1] as usize;
            let end = index + 2 + length;

            if end > data.len() {
                return Err(Error::InvalidPacket("Option data truncated".to_string()));
            }

            options.push(DhcpOption::parse(code, &data[index + 2..end])?);
            index = end;
        }

        Ok(options)
    }

    /// Encodes the packet to bytes for transmission.
    ///
    /// The returned buffer is at least 300 bytes (padded per RFC 2131).
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(DHCP_ENCODE_CAPACITY);

        packet.extend_from_slice(&[self.op, self.htype, self.hlen, self.hops]);
        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        for address in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            packet.extend_from_slice(&address.octets());
        }

        packet.extend_from_slice(&self.chaddr);
        packet.resize(DHCP_MAGIC_COOKIE_OFFSET, 0);
        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in &self.options {
            packet.extend_from_slice(&option.encode());
        }

        packet.push(OptionCode::End as u8);

        if packet.len() < DHCP_MIN_PACKET_SIZE {
            packet.resize(DHCP_MIN_PACKET_SIZE, 0);
        }

        packet
    }

    /// Returns the DHCP message type (Option 53) if present.
    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::MessageType(t) => Some(*t),
            _ => None,
        })
    }

    /// Returns the requested IP address (Option 50) if present.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Returns the server identifier (Option 54) if present.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::ServerIdentifier(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Returns the client identifier (Option 61) if present.
    pub fn client_identifier(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::ClientIdentifier(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    /// Returns the relay agent information (Option 82) if present.
    pub fn relay_agent_info(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::RelayAgentInfo(info) => Some(info.as_slice()),
            _ => None,
        })
    }

    /// Returns the agent-circuit-id inserted by a relay, if any.
    pub fn agent_circuit_id(&self) -> Option<&[u8]> {
        self.relay_agent_info()
            .and_then(|info| relay_sub_option(info, AGENT_CIRCUIT_ID))
    }

    /// Returns the agent-remote-id inserted by a relay, if any.
    pub fn agent_remote_id(&self) -> Option<&[u8]> {
        self.relay_agent_info()
            .and_then(|info| relay_sub_option(info, AGENT_REMOTE_ID))
    }

    /// Returns the first six bytes of `chaddr`.
    pub fn hardware_address(&self) -> [u8; 6] {
        let mut hwaddr = [0u8; 6];
        hwaddr.copy_from_slice(&self.chaddr[..6]);
        hwaddr
    }

    /// Creates a DHCP reply packet from a request.
    ///
    /// The message type is added as the first option. `xid`, `flags`,
    /// `giaddr`, `chaddr`, `htype` and `hlen` are copied from the request.
    pub fn create_reply(
        request: &DhcpPacket,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = vec![DhcpOption::MessageType(message_type)];
        all_options.extend(options);

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            options: all_options,
        }
    }
}

/// Formats a hardware address as `aa:bb:cc:dd:ee:ff`.
pub fn format_mac(hwaddr: &[u8; 6]) -> String {
    hwaddr
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}
