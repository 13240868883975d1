//! Outgoing packet templates.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder filled with the challenge token.
pub const TOKEN_SLOT: &[u8] = b"%s";

/// Transport a protocol is spoken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
        }
    }
}

/// What a packet asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Challenge,
    All,
    Basic,
    Channels,
    Details,
    Info,
    Players,
    Rules,
    Status,
    Version,
}

/// A request template that may carry one `%s` token slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    template: Bytes,
}

impl Packet {
    pub fn new(template: impl Into<Bytes>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &Bytes {
        &self.template
    }

    pub fn has_slot(&self) -> bool {
        slot_position(&self.template).is_some()
    }

    /// Substitutes `token` into the slot. Returns false if there is no slot.
    pub fn apply_token(&mut self, token: &[u8]) -> bool {
        match slot_position(&self.template) {
            Some(pos) => {
                let mut filled = BytesMut::with_capacity(self.template.len() + token.len());
                filled.extend_from_slice(&self.template[..pos]);
                filled.extend_from_slice(token);
                filled.extend_from_slice(&self.template[pos + TOKEN_SLOT.len()..]);
                self.template = filled.freeze();
                true
            }
            None => false,
        }
    }

    /// Bytes to put on the wire. An unfilled slot renders empty.
    pub fn to_bytes(&self) -> Bytes {
        if self.has_slot() {
            let mut packet = self.clone();
            packet.apply_token(&[]);
            packet.template
        } else {
            self.template.clone()
        }
    }
}

fn slot_position(template: &[u8]) -> Option<usize> {
    template
        .windows(TOKEN_SLOT.len())
        .position(|window| window == TOKEN_SLOT)
}

/// Ordered set of packets a protocol sends, keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packets {
    entries: Vec<(PacketKind, Packet)>,
}

impl Packets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the packet for `kind`, keeping first-insert order.
    pub fn with(mut self, kind: PacketKind, template: impl Into<Bytes>) -> Self {
        self.insert(kind, Packet::new(template));
        self
    }

    pub fn insert(&mut self, kind: PacketKind, packet: Packet) {
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, existing)) => *existing = packet,
            None => self.entries.push((kind, packet)),
        }
    }

    pub fn remove(&mut self, kind: PacketKind) -> Option<Packet> {
        let pos = self.entries.iter().position(|(k, _)| *k == kind)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, kind: PacketKind) -> Option<&Packet> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, packet)| packet)
    }

    pub fn get_mut(&mut self, kind: PacketKind) -> Option<&mut Packet> {
        self.entries
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, packet)| packet)
    }

    pub fn contains(&self, kind: PacketKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PacketKind, &Packet)> {
        self.entries.iter().map(|(kind, packet)| (*kind, packet))
    }

    /// Everything except the challenge packet, in send order.
    pub fn queries(&self) -> impl Iterator<Item = (PacketKind, &Packet)> {
        self.iter().filter(|(kind, _)| *kind != PacketKind::Challenge)
    }

    /// Fills the token slot of every packet that has one.
    pub fn apply_token(&mut self, token: &[u8]) {
        for (_, packet) in self.entries.iter_mut() {
            packet.apply_token(token);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
