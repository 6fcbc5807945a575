//! Correlation of inbound DHCP messages to sessions.
//!
//! A [`CorrelationKey`] is derived from every inbound message and a copy is
//! stored by the session created from a DISCOVER. Presence of each optional
//! relay or client field has to agree exactly: a message carrying an
//! agent-circuit-id never matches a session recorded without one, and the
//! reverse. Otherwise a client without relay-inserted options could take
//! over a session a relay created.

use std::net::Ipv4Addr;

use crate::packet::DhcpPacket;

/// The fields that identify which session a DHCP message belongs to.
///
/// All byte strings are owned copies; the packet they came from is dropped
/// long before the session is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationKey {
    pub xid: u32,
    /// Relay gateway address, `0.0.0.0` when the message was not relayed.
    pub giaddr: Ipv4Addr,
    pub agent_circuit_id: Option<Box<[u8]>>,
    pub agent_remote_id: Option<Box<[u8]>>,
    pub client_id: Option<Box<[u8]>>,
    pub hwaddr: [u8; 6],
}

fn optional_field_matches(left: &Option<Box<[u8]>>, right: &Option<Box<[u8]>>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(left), Some(right)) => left.len() == right.len() && left[..] == right[..],
        _ => false,
    }
}

impl CorrelationKey {
    pub fn from_packet(packet: &DhcpPacket) -> Self {
        Self {
            xid: packet.xid,
            giaddr: packet.giaddr,
            agent_circuit_id: packet.agent_circuit_id().map(Box::from),
            agent_remote_id: packet.agent_remote_id().map(Box::from),
            client_id: packet.client_identifier().map(Box::from),
            hwaddr: packet.hardware_address(),
        }
    }

    /// Returns true if both keys identify the same client exchange.
    pub fn matches(&self, other: &CorrelationKey) -> bool {
        self.xid == other.xid
            && self.giaddr == other.giaddr
            && optional_field_matches(&self.agent_circuit_id, &other.agent_circuit_id)
            && optional_field_matches(&self.agent_remote_id, &other.agent_remote_id)
            && optional_field_matches(&self.client_id, &other.client_id)
            && self.hwaddr == other.hwaddr
    }
}
