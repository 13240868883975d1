//! The decoder boundary: what the query engine needs from a protocol.

use crate::buffer::Buffer;
use crate::error::ProtocolError;
use crate::packet::{PacketKind, Packets, Transport};
use crate::result::ResultSet;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// Free-form per-server protocol options.
pub type Options = HashMap<String, serde_json::Value>;

/// Where a query is headed, handed to [`Protocol::before_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTarget {
    pub ip: IpAddr,
    pub port_client: u16,
    pub port_query: u16,
}

/// Static description of one game served by a protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Game {
    /// Identifier used to select the protocol, e.g. `csgo`.
    pub kind: &'static str,
    /// Human readable name.
    pub name_long: &'static str,
    /// Distance from the client port to the query port.
    pub port_offset: i32,
    /// Join link template with `{ip}` and `{port}` placeholders.
    pub join_link: Option<&'static str>,
}

/// A game server query protocol.
///
/// Implementations own their outgoing packets: the engine reads them with
/// [`packets`](Self::packets), lets the protocol fill in a challenge token,
/// sends them, and finally hands every received datagram back to
/// [`process_response`](Self::process_response).
pub trait Protocol: Send + fmt::Debug {
    fn game(&self) -> &Game;

    /// Protocol family, e.g. `source` or `gamespy3`.
    fn family(&self) -> &'static str;

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn packets(&self) -> &Packets;

    fn packets_mut(&mut self) -> &mut Packets;

    fn has_challenge(&self) -> bool {
        self.packets().contains(PacketKind::Challenge)
    }

    /// Parses a challenge reply and substitutes the token into the pending
    /// packets. Returns whether a token was applied.
    fn apply_challenge(&mut self, _challenge: Buffer) -> Result<bool, ProtocolError> {
        Ok(false)
    }

    /// Last chance to adjust packets right before they are written.
    fn before_send(&mut self, _target: &QueryTarget) {}

    /// Decodes every datagram received for this server, in arrival order.
    fn process_response(&self, responses: &[Bytes]) -> Result<ResultSet, ProtocolError>;

    fn kind(&self) -> &'static str {
        self.game().kind
    }

    fn name_long(&self) -> &'static str {
        self.game().name_long
    }

    fn port_offset(&self) -> i32 {
        self.game().port_offset
    }

    fn join_link(&self) -> Option<&'static str> {
        self.game().join_link
    }

    /// Query port for a given client port, `None` if it falls outside the
    /// valid port range.
    fn query_port(&self, port_client: u16) -> Option<u16> {
        u16::try_from(i32::from(port_client) + self.port_offset()).ok()
    }
}

/// Expands a join link template for a server.
pub fn format_join_link(template: &str, ip: &IpAddr, port: u16) -> String {
    template
        .replace("{ip}", &ip.to_string())
        .replace("{port}", &port.to_string())
}
