//! Routing of inbound DHCP messages to sessions.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::key::CorrelationKey;
use crate::options::MessageType;
use crate::packet::DhcpPacket;
use crate::service::{Service, Sessions, detach, lookup};
use crate::session::{SessionState, TerminateReason};
use crate::transport::ReplyKind;

impl Service {
    /// Handles one inbound message.
    ///
    /// Runs under the session lock from lookup to the end of the reaction.
    /// Work that belongs to a session is queued to it, never awaited.
    pub async fn dispatch(self: &Arc<Self>, packet: DhcpPacket) {
        let Some(message_type) = packet.message_type() else {
            debug!(ifname = %self.ifname(), "ignoring message without DHCP message type");
            return;
        };

        let key = CorrelationKey::from_packet(&packet);
        if self.shared().verbose {
            info!(ifname = %self.ifname(), ?key, "recv {}", message_type);
        } else {
            debug!(ifname = %self.ifname(), ?key, "recv {}", message_type);
        }

        let mut sessions = self.lock().await;
        match message_type {
            MessageType::Discover => self.handle_discover(&mut sessions, key, packet),
            MessageType::Request => self.handle_request(&mut sessions, &key, packet),
            MessageType::Decline | MessageType::Release => {
                if let Some(id) = lookup(&sessions, &key).map(|handle| handle.id()) {
                    detach(&mut sessions, id, TerminateReason::UserRequest);
                }
            }
            _ => debug!(ifname = %self.ifname(), "ignoring {}", message_type),
        }
    }

    fn handle_discover(
        self: &Arc<Self>,
        sessions: &mut Sessions,
        key: CorrelationKey,
        packet: DhcpPacket,
    ) {
        let Some(handle) = lookup(sessions, &key) else {
            if let Some(id) = self.create_session(sessions, key, packet) {
                debug!(ifname = %self.ifname(), session = id, "session created");
            }
            return;
        };

        let status = handle.status();
        match status.lease {
            Some(lease) if status.state == SessionState::Active => {
                let lease_time = self.shared().settings.lease_time;
                if let Err(error) = self.sender().send(ReplyKind::Offer, &packet, &lease, lease_time)
                {
                    warn!(ifname = %self.ifname(), session = handle.id(), "failed to re-offer: {}", error);
                }
            }
            _ => debug!(session = handle.id(), state = ?status.state, "duplicate DISCOVER"),
        }
    }

    fn handle_request(&self, sessions: &mut Sessions, key: &CorrelationKey, packet: DhcpPacket) {
        let Some(handle) = lookup(sessions, key) else {
            debug!(ifname = %self.ifname(), "REQUEST for unknown session");
            self.negative_ack(&packet);
            return;
        };

        let id = handle.id();
        let status = handle.status();
        let requested_ip = packet.requested_ip();
        let matched = status.lease.is_some_and(|lease| {
            packet.server_identifier() == Some(lease.addr) && requested_ip == Some(lease.peer_addr)
        });

        if !matched {
            match status.lease {
                Some(lease) => {
                    if requested_ip != Some(lease.peer_addr) {
                        self.negative_ack(&packet);
                    }
                    warn!(session = id, ?requested_ip, "REQUEST does not match lease");
                }
                None => debug!(session = id, "REQUEST before an address was offered"),
            }
            detach(sessions, id, TerminateReason::UserRequest);
            return;
        }

        if status.state == SessionState::Starting {
            if !handle.attach_request(packet) {
                debug!(session = id, "REQUEST already pending");
            }
        } else {
            debug!(session = id, state = ?status.state, "duplicate REQUEST");
        }
    }

    fn negative_ack(&self, packet: &DhcpPacket) {
        if let Err(error) = self.sender().send_negative_ack(packet) {
            warn!(ifname = %self.ifname(), "failed to send {}: {}", MessageType::Nak, error);
        }
    }
}
