//! GameSpy3 server queries.
//!
//! The server answers one "all" request with key/value details followed by
//! player and team sections, possibly split over several datagrams. Servers
//! bind the challenge to the client's source port, so the same socket must be
//! used for the challenge and the query.

use super::latin1;
use crate::buffer::{Buffer, ByteOrder};
use crate::error::ProtocolError;
use crate::packet::{PacketKind, Packets};
use crate::protocol::{Game, Protocol};
use crate::result::{ResultSet, PLAYERS, TEAMS};
use crate::split::{Boundary, Fragment, Reassembler};
use bytes::Bytes;

pub const GAMESPY3: Game = Game {
    kind: "gamespy3",
    name_long: "GameSpy3",
    port_offset: 0,
    join_link: None,
};

pub const BF2: Game = Game {
    kind: "bf2",
    name_long: "Battlefield 2",
    port_offset: 13333,
    join_link: None,
};

#[derive(Debug, Clone)]
pub struct GameSpy3 {
    game: Game,
    packets: Packets,
}

impl GameSpy3 {
    pub fn new(game: Game) -> Self {
        let packets = Packets::new()
            .with(PacketKind::Challenge, &b"\xFE\xFD\x09\x10\x20\x30\x40"[..])
            .with(
                PacketKind::All,
                &b"\xFE\xFD\x00\x10\x20\x30\x40%s\xFF\xFF\xFF\x01"[..],
            );
        Self { game, packets }
    }

    /// Variant for servers that answer without a challenge round.
    pub fn without_challenge(game: Game) -> Self {
        let mut protocol = Self::new(game);
        protocol.packets.remove(PacketKind::Challenge);
        protocol
    }
}

impl Protocol for GameSpy3 {
    fn game(&self) -> &Game {
        &self.game
    }

    fn family(&self) -> &'static str {
        "gamespy3"
    }

    fn packets(&self) -> &Packets {
        &self.packets
    }

    fn packets_mut(&mut self) -> &mut Packets {
        &mut self.packets
    }

    fn apply_challenge(&mut self, mut challenge: Buffer) -> Result<bool, ProtocolError> {
        // Type byte and session id
        challenge.skip(5)?;
        let token = challenge
            .read_string()
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|value| *value != 0)
            .map(|value| (value as u32).to_be_bytes().to_vec())
            .unwrap_or_default();
        self.packets.apply_token(&token);
        Ok(true)
    }

    fn process_response(&self, responses: &[Bytes]) -> Result<ResultSet, ProtocolError> {
        let payload = Reassembler::new(Boundary::ElideDuplicateVariables)
            .reassemble(responses, parse_fragment)?;

        let mut buffer = Buffer::with_order(payload, ByteOrder::Big);
        let mut result = ResultSet::new();
        decode_details(&mut buffer, &mut result);
        decode_players_and_teams(&buffer.rest(), &mut result);
        Ok(result)
    }
}

fn parse_fragment(chunk: &Bytes) -> Result<Fragment, ProtocolError> {
    let mut buffer = Buffer::with_order(chunk.clone(), ByteOrder::Big);
    let _kind = buffer.read_u8()?;
    let _session = buffer.read_u32()?;
    // "splitnum\0"
    buffer.skip(9)?;
    // High bit flags the last fragment
    let id = buffer.read_u8()?;
    buffer.skip(1)?;
    Ok(Fragment::new(u32::from(id & 0x7F), buffer.rest()))
}

fn decode_details(buffer: &mut Buffer, result: &mut ResultSet) {
    while !buffer.is_empty() {
        let key = buffer.read_bytes_until(0);
        if key.is_empty() {
            break;
        }
        let value = buffer.read_bytes_until(0);
        result.add(latin1(&key), latin1(&value));
    }
}

/// Walks the `\0\0`-separated sections after the details. Each header
/// (`name_` for players, `name_t` for teams) selects the column that the
/// following values fill.
fn decode_players_and_teams(data: &[u8], result: &mut ResultSet) {
    let mut column: Option<(&'static str, String)> = None;

    for section in split_sections(data) {
        for item in section.split(|&b| b == 0) {
            if item.is_empty() {
                continue;
            }
            let text = latin1(item);
            if text.ends_with("_t") {
                let name: String = text.chars().filter(|c| *c != '\u{2}').collect();
                let name = name.strip_suffix("_t").unwrap_or(&name).to_string();
                column = Some((TEAMS, name));
            } else if text.ends_with('_') {
                let name: String = text.chars().filter(|c| *c != '\u{1}').collect();
                column = Some((PLAYERS, name.trim_end_matches('_').to_string()));
            } else if let Some((group, key)) = &column {
                result.add_sub(group, key, text);
            }
        }
    }
}

fn split_sections(data: &[u8]) -> Vec<&[u8]> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            sections.push(&data[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    sections.push(&data[start.min(data.len())..]);
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(index: u8, last: bool, payload: &[u8]) -> Bytes {
        let mut chunk = vec![0x00];
        chunk.extend_from_slice(&0x1020_3040u32.to_be_bytes());
        chunk.extend_from_slice(b"splitnum\x00");
        chunk.push(if last { index | 0x80 } else { index });
        chunk.push(0x00);
        chunk.extend_from_slice(payload);
        Bytes::from(chunk)
    }

    const BODY: &[u8] = b"hostname\x00Caf\xE9 Server\x00mapname\x00Strike\x00numplayers\x002\x00\x00\
\x01player_\x00\x00alice\x00bob\x00\x00score_\x00\x0010\x005\x00\x00\
\x02team_t\x00\x00MEC\x00USMC\x00\x00";

    #[test]
    fn test_packets() {
        let gs3 = GameSpy3::new(GAMESPY3);
        assert!(gs3.has_challenge());
        let bf2 = GameSpy3::without_challenge(BF2);
        assert!(!bf2.has_challenge());
        assert_eq!(bf2.query_port(16567), Some(29900));
        // Without a token the slot collapses
        assert_eq!(
            bf2.packets().get(PacketKind::All).unwrap().to_bytes().as_ref(),
            b"\xFE\xFD\x00\x10\x20\x30\x40\xFF\xFF\xFF\x01"
        );
    }

    #[test]
    fn test_apply_challenge_packs_big_endian() {
        let mut gs3 = GameSpy3::new(GAMESPY3);
        let reply = Buffer::new(&b"\x09\x10\x20\x30\x4012345678\x00"[..]);
        assert!(gs3.apply_challenge(reply).unwrap());
        assert_eq!(
            gs3.packets().get(PacketKind::All).unwrap().to_bytes().as_ref(),
            b"\xFE\xFD\x00\x10\x20\x30\x40\x00\xBC\x61\x4E\xFF\xFF\xFF\x01"
        );
    }

    #[test]
    fn test_apply_challenge_negative() {
        let mut gs3 = GameSpy3::new(GAMESPY3);
        let reply = Buffer::new(&b"\x09\x10\x20\x30\x40-1\x00"[..]);
        gs3.apply_challenge(reply).unwrap();
        let bytes = gs3.packets().get(PacketKind::All).unwrap().to_bytes();
        assert_eq!(&bytes[7..11], b"\xFF\xFF\xFF\xFF");
    }

    #[test]
    fn test_apply_challenge_zero_is_empty() {
        let mut gs3 = GameSpy3::new(GAMESPY3);
        let reply = Buffer::new(&b"\x09\x10\x20\x30\x400\x00"[..]);
        gs3.apply_challenge(reply).unwrap();
        assert_eq!(
            gs3.packets().get(PacketKind::All).unwrap().template().as_ref(),
            b"\xFE\xFD\x00\x10\x20\x30\x40\xFF\xFF\xFF\x01"
        );
    }

    #[test]
    fn test_apply_challenge_truncated() {
        let mut gs3 = GameSpy3::new(GAMESPY3);
        assert!(gs3.apply_challenge(Buffer::new(&b"\x09\x10"[..])).is_err());
    }

    #[test]
    fn test_single_packet() {
        let gs3 = GameSpy3::new(GAMESPY3);
        let result = gs3.process_response(&[fragment(0, true, BODY)]).unwrap();

        assert_eq!(result.get("hostname"), Some(&json!("Café Server")));
        assert_eq!(result.get("mapname"), Some(&json!("Strike")));
        assert_eq!(result.get("numplayers"), Some(&json!("2")));
        assert_eq!(
            result.get(PLAYERS),
            Some(&json!([
                {"player": "alice", "score": "10"},
                {"player": "bob", "score": "5"},
            ]))
        );
        assert_eq!(
            result.get(TEAMS),
            Some(&json!([{"team": "MEC"}, {"team": "USMC"}]))
        );
    }

    #[test]
    fn test_split_with_duplicate_boundary() {
        let first = b"hostname\x00srv\x00\x00\x01player_\x00\x00alice\x00bo\x00";
        let second = b"player_\x00\x01bob\x00carol\x00\x00";
        let result = GameSpy3::new(GAMESPY3)
            .process_response(&[fragment(1, true, second), fragment(0, false, first)])
            .unwrap();

        assert_eq!(result.get("hostname"), Some(&json!("srv")));
        assert_eq!(
            result.get(PLAYERS),
            Some(&json!([
                {"player": "alice"},
                {"player": "bob"},
                {"player": "carol"},
            ]))
        );
    }

    #[test]
    fn test_values_before_header_are_skipped() {
        let mut result = ResultSet::new();
        decode_players_and_teams(b"\x00orphan\x00\x00\x01player_\x00\x00x\x00", &mut result);
        assert_eq!(result.get(PLAYERS), Some(&json!([{"player": "x"}])));
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_short_fragment_header() {
        let err = GameSpy3::new(GAMESPY3)
            .process_response(&[Bytes::from_static(b"\x00\x01\x02")])
            .unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_split_sections() {
        assert_eq!(
            split_sections(b"a\x00\x00b\x00c\x00\x00"),
            vec![&b"a"[..], &b"b\x00c"[..], &b""[..]]
        );
        assert_eq!(split_sections(b""), vec![&b""[..]]);
    }
}
