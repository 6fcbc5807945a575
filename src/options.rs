//! DHCP options understood by the session controller.
//!
//! Only the options that take part in session correlation or in the replies
//! built for a session are decoded. Everything else is preserved as
//! [`DhcpOption::Unknown`].
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions
//! - RFC 3046: DHCP Relay Agent Information Option (Option 82)

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// DHCP option codes as defined in RFC 2132.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Used for alignment.
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// IP address lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// Option overload - indicates sname/file fields contain options (RFC 2132 §9.3).
    OptionOverload = 52,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// Client identifier (RFC 2132 §9.14).
    ClientIdentifier = 61,
    /// Relay agent information (RFC 3046).
    RelayAgentInfo = 82,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            52 => Ok(Self::OptionOverload),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            61 => Ok(Self::ClientIdentifier),
            82 => Ok(Self::RelayAgentInfo),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// Relay agent sub-option carrying the agent-circuit-id (RFC 3046 §2.1).
pub const AGENT_CIRCUIT_ID: u8 = 1;

/// Relay agent sub-option carrying the agent-remote-id (RFC 3046 §2.2).
pub const AGENT_REMOTE_ID: u8 = 2;

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
    /// Client requests config without IP allocation.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

/// Option overload flags (Option 52) as defined in RFC 2132 §9.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OverloadFlag {
    /// The `file` field contains options.
    File = 1,
    /// The `sname` field contains options.
    Sname = 2,
    /// Both `file` and `sname` fields contain options.
    Both = 3,
}

impl TryFrom<u8> for OverloadFlag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::File),
            2 => Ok(Self::Sname),
            3 => Ok(Self::Both),
            other => Err(other),
        }
    }
}

/// A parsed DHCP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Router/gateway addresses (Option 3).
    Router(Vec<Ipv4Addr>),
    /// Client's requested IP address (Option 50).
    RequestedIpAddress(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// Indicates sname/file fields contain options (Option 52).
    OptionOverload(OverloadFlag),
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Server identifier (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Client identifier (Option 61), kept as opaque bytes.
    ClientIdentifier(Vec<u8>),
    /// Relay agent information (Option 82), kept as raw sub-option TLVs.
    RelayAgentInfo(Vec<u8>),
    /// Unknown option with raw code and data.
    Unknown(u8, Vec<u8>),
}

fn parse_ipv4(data: &[u8], what: &str) -> Result<Ipv4Addr> {
    match data {
        [a, b, c, d] => Ok(Ipv4Addr::new(*a, *b, *c, *d)),
        _ => Err(Error::InvalidPacket(format!("Invalid {} length", what))),
    }
}

fn encode_tlv(code: u8, data: &[u8]) -> Vec<u8> {
    let len = data.len().min(255);
    let mut result = Vec::with_capacity(len + 2);
    result.push(code);
    result.push(len as u8);
    result.extend_from_slice(&data[..len]);
    result
}

impl DhcpOption {
    /// Returns the RFC 2132 option code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::OptionOverload(_) => OptionCode::OptionOverload as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::ClientIdentifier(_) => OptionCode::ClientIdentifier as u8,
            Self::RelayAgentInfo(_) => OptionCode::RelayAgentInfo as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Parses a DHCP option from its code and raw data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the data length is invalid for
    /// the option type.
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Ok(Self::SubnetMask(parse_ipv4(data, "subnet mask")?)),
            Ok(OptionCode::Router) => {
                if !data.len().is_multiple_of(4) || data.is_empty() {
                    return Err(Error::InvalidPacket(
                        "Invalid router option length".to_string(),
                    ));
                }
                let routers = data
                    .chunks_exact(4)
                    .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
                    .collect();
                Ok(Self::Router(routers))
            }
            Ok(OptionCode::RequestedIpAddress) => Ok(Self::RequestedIpAddress(parse_ipv4(
                data,
                "requested IP address",
            )?)),
            Ok(OptionCode::LeaseTime) => match data {
                [a, b, c, d] => Ok(Self::LeaseTime(u32::from_be_bytes([*a, *b, *c, *d]))),
                _ => Err(Error::InvalidPacket(
                    "Invalid lease time length".to_string(),
                )),
            },
            Ok(OptionCode::OptionOverload) => {
                let [value] = data else {
                    return Err(Error::InvalidPacket(
                        "Invalid option overload length".to_string(),
                    ));
                };
                let flag = OverloadFlag::try_from(*value).map_err(|value| {
                    Error::InvalidPacket(format!("Invalid option overload value: {}", value))
                })?;
                Ok(Self::OptionOverload(flag))
            }
            Ok(OptionCode::MessageType) => {
                let [value] = data else {
                    return Err(Error::InvalidPacket(
                        "Invalid message type length".to_string(),
                    ));
                };
                let message_type = MessageType::try_from(*value).map_err(|value| {
                    Error::InvalidPacket(format!("Unknown message type: {}", value))
                })?;
                Ok(Self::MessageType(message_type))
            }
            Ok(OptionCode::ServerIdentifier) => Ok(Self::ServerIdentifier(parse_ipv4(
                data,
                "server identifier",
            )?)),
            Ok(OptionCode::ClientIdentifier) => Ok(Self::ClientIdentifier(data.to_vec())),
            Ok(OptionCode::RelayAgentInfo) => Ok(Self::RelayAgentInfo(data.to_vec())),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => Err(Error::InvalidPacket(
                "Pad/End should not be parsed as options".to_string(),
            )),
            Err(unknown_code) => Ok(Self::Unknown(unknown_code, data.to_vec())),
        }
    }

    /// Encodes the option to its wire format (code + length + data).
    pub fn encode(&self) -> Vec<u8> {
        let code = self.option_code();
        match self {
            Self::SubnetMask(addr)
            | Self::RequestedIpAddress(addr)
            | Self::ServerIdentifier(addr) => encode_tlv(code, &addr.octets()),
            Self::Router(addrs) => {
                let data: Vec<u8> = addrs
                    .iter()
                    .take(63)
                    .flat_map(|addr| addr.octets())
                    .collect();
                encode_tlv(code, &data)
            }
            Self::LeaseTime(time) => encode_tlv(code, &time.to_be_bytes()),
            Self::OptionOverload(flag) => vec![code, 1, *flag as u8],
            Self::MessageType(message_type) => vec![code, 1, *message_type as u8],
            Self::ClientIdentifier(data)
            | Self::RelayAgentInfo(data)
            | Self::Unknown(_, data) => encode_tlv(code, data),
        }
    }
}

/// Finds a relay agent sub-option inside raw Option 82 data.
///
/// Returns `None` when the sub-option is missing or the encoding is
/// truncated; a malformed relay block never makes the whole packet invalid.
pub fn relay_sub_option(data: &[u8], code: u8) -> Option<&[u8]> {
    let mut index = 0;
    while index + 2 <= data.len() {
        let sub_code = data[index];
        let length = data[index + 1] as usize;
        let end = index + 2 + length;
        if end > data.len() {
            return None;
        }
        if sub_code == code {
            return Some(&data[index + 2..end]);
        }
        index = end;
    }
    None
}
