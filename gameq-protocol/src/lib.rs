//! # gameq-protocol
//!
//! Wire-level building blocks for gameq, the game server query engine.
//!
//! This crate provides:
//! - A bounds-checked binary cursor ([`Buffer`]) used by every decoder
//! - Split datagram reassembly with bzip2 and duplicate-boundary handling
//! - The result accumulator ([`ResultSet`]) with player/team rows
//! - The [`Protocol`] trait and the built-in Source and GameSpy3 families

pub mod buffer;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod protocols;
pub mod result;
pub mod split;

pub use buffer::{Buffer, ByteOrder};
pub use error::ProtocolError;
pub use packet::{Packet, PacketKind, Packets, Transport, TOKEN_SLOT};
pub use protocol::{format_join_link, Game, Options, Protocol, QueryTarget};
pub use result::{Fields, ResultSet, PLAYERS, TEAMS};
pub use split::{Boundary, Compression, Fragment, Reassembler};
