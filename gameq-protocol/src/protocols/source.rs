//! Valve Source and GoldSource server queries (A2S).

use crate::buffer::Buffer;
use crate::error::ProtocolError;
use crate::packet::{PacketKind, Packets};
use crate::protocol::{Game, Protocol};
use crate::result::ResultSet;
use crate::split::{Boundary, Compression, Fragment, Reassembler};
use bytes::Bytes;

const SINGLE_PACKET: i32 = -1;
const SPLIT_PACKET: i32 = -2;
const COMPRESSED: u32 = 0x8000_0000;
const THE_SHIP_APP_ID: u16 = 2400;

const CHALLENGE_RESPONSE: u8 = b'A';
const DETAILS_RESPONSE: u8 = b'I';
const GOLDSOURCE_DETAILS_RESPONSE: u8 = b'm';
const PLAYERS_RESPONSE: u8 = b'D';
const RULES_RESPONSE: u8 = b'E';

const JOIN_LINK: &str = "steam://connect/{ip}:{port}/";

pub const SOURCE: Game = Game {
    kind: "source",
    name_long: "Source Server",
    port_offset: 0,
    join_link: Some(JOIN_LINK),
};

pub const CSGO: Game = Game {
    kind: "csgo",
    name_long: "Counter-Strike: Global Offensive",
    ..SOURCE
};

pub const CSS: Game = Game {
    kind: "css",
    name_long: "Counter-Strike: Source",
    ..SOURCE
};

pub const TF2: Game = Game {
    kind: "tf2",
    name_long: "Team Fortress 2",
    ..SOURCE
};

pub const GMOD: Game = Game {
    kind: "gmod",
    name_long: "Garry's Mod",
    ..SOURCE
};

pub const ARMA3: Game = Game {
    kind: "arma3",
    name_long: "Arma3",
    port_offset: 1,
    ..SOURCE
};

pub const CS16: Game = Game {
    kind: "cs16",
    name_long: "Counter-Strike 1.6",
    ..SOURCE
};

/// Engine generation, which decides the split packet header layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceEngine {
    #[default]
    Source,
    GoldSource,
}

#[derive(Debug, Clone)]
pub struct Source {
    game: Game,
    engine: SourceEngine,
    packets: Packets,
}

impl Source {
    pub fn new(game: Game) -> Self {
        Self::with_engine(game, SourceEngine::Source)
    }

    pub fn with_engine(game: Game, engine: SourceEngine) -> Self {
        let packets = Packets::new()
            .with(
                PacketKind::Challenge,
                &b"\xFF\xFF\xFF\xFF\x56\x00\x00\x00\x00"[..],
            )
            .with(
                PacketKind::Details,
                &b"\xFF\xFF\xFF\xFFTSource Engine Query\x00%s"[..],
            )
            .with(PacketKind::Players, &b"\xFF\xFF\xFF\xFF\x55%s"[..])
            .with(PacketKind::Rules, &b"\xFF\xFF\xFF\xFF\x56%s"[..]);
        Self {
            game,
            engine,
            packets,
        }
    }

    pub fn engine(&self) -> SourceEngine {
        self.engine
    }

    /// Joins the fragments of one split response and strips the inner
    /// single-packet header.
    fn reassemble(&self, request_id: i32, chunks: &[Bytes]) -> Result<Bytes, ProtocolError> {
        let compressed = request_id as u32 & COMPRESSED != 0;
        let engine = self.engine;
        let joined = Reassembler::new(Boundary::Keep).reassemble(chunks, |chunk| match engine {
            SourceEngine::Source => parse_source_fragment(chunk, compressed),
            SourceEngine::GoldSource => parse_goldsource_fragment(chunk),
        })?;

        let mut buffer = Buffer::new(joined);
        let header = buffer.read_i32()?;
        if header != SINGLE_PACKET {
            return Err(ProtocolError::UnexpectedHeader {
                expected: SINGLE_PACKET.into(),
                actual: header.into(),
            });
        }
        Ok(buffer.rest())
    }
}

impl Protocol for Source {
    fn game(&self) -> &Game {
        &self.game
    }

    fn family(&self) -> &'static str {
        "source"
    }

    fn packets(&self) -> &Packets {
        &self.packets
    }

    fn packets_mut(&mut self) -> &mut Packets {
        &mut self.packets
    }

    fn apply_challenge(&mut self, mut challenge: Buffer) -> Result<bool, ProtocolError> {
        let header = challenge.read_i32()?;
        if header != SINGLE_PACKET {
            return Err(ProtocolError::UnexpectedHeader {
                expected: SINGLE_PACKET.into(),
                actual: header.into(),
            });
        }
        let kind = challenge.read_u8()?;
        if kind != CHALLENGE_RESPONSE {
            return Err(ProtocolError::UnknownResponse(kind));
        }
        let token = challenge.read(4)?;
        self.packets.apply_token(&token);
        Ok(true)
    }

    fn process_response(&self, responses: &[Bytes]) -> Result<ResultSet, ProtocolError> {
        let mut packets = Vec::new();
        let mut splits: Vec<(i32, Vec<Bytes>)> = Vec::new();

        for chunk in responses {
            let mut buffer = Buffer::new(chunk.clone());
            match buffer.read_i32()? {
                SINGLE_PACKET => packets.push(buffer.rest()),
                SPLIT_PACKET => {
                    let request_id = buffer.read_i32()?;
                    match splits.iter_mut().find(|(id, _)| *id == request_id) {
                        Some((_, chunks)) => chunks.push(buffer.rest()),
                        None => splits.push((request_id, vec![buffer.rest()])),
                    }
                }
                other => {
                    return Err(ProtocolError::UnexpectedHeader {
                        expected: SINGLE_PACKET.into(),
                        actual: other.into(),
                    })
                }
            }
        }

        for (request_id, chunks) in &splits {
            packets.push(self.reassemble(*request_id, chunks)?);
        }

        let mut result = ResultSet::new();
        for packet in packets {
            result.merge(decode_packet(packet)?);
        }
        Ok(result)
    }
}

fn parse_source_fragment(chunk: &Bytes, compressed: bool) -> Result<Fragment, ProtocolError> {
    let mut buffer = Buffer::new(chunk.clone());
    let _total = buffer.read_u8()?;
    let number = buffer.read_u8()?;

    if compressed && number == 0 {
        let size = buffer.read_i32()?;
        let checksum = buffer.read_u32()?;
        let decompressed_len = usize::try_from(size).map_err(|_| {
            ProtocolError::Malformed(format!("negative decompressed size {size}"))
        })?;
        return Ok(Fragment::new(u32::from(number), buffer.rest()).compressed(Compression {
            decompressed_len,
            checksum,
        }));
    }

    let _size = buffer.read_u16()?;
    Ok(Fragment::new(u32::from(number), buffer.rest()))
}

fn parse_goldsource_fragment(chunk: &Bytes) -> Result<Fragment, ProtocolError> {
    let mut buffer = Buffer::new(chunk.clone());
    // High nibble is the fragment number, low nibble the total
    let number = buffer.read_u8()? >> 4;
    Ok(Fragment::new(u32::from(number), buffer.rest()))
}

fn decode_packet(packet: Bytes) -> Result<ResultSet, ProtocolError> {
    let mut buffer = Buffer::new(packet);
    match buffer.read_u8()? {
        DETAILS_RESPONSE => decode_details(&mut buffer),
        GOLDSOURCE_DETAILS_RESPONSE => decode_goldsource_details(&mut buffer),
        PLAYERS_RESPONSE => decode_players(&mut buffer),
        RULES_RESPONSE => decode_rules(&mut buffer),
        other => Err(ProtocolError::UnknownResponse(other)),
    }
}

fn read_char(buffer: &mut Buffer) -> Result<String, ProtocolError> {
    Ok(char::from(buffer.read_u8()?).to_string())
}

fn decode_details(buffer: &mut Buffer) -> Result<ResultSet, ProtocolError> {
    let mut result = ResultSet::new();
    result.add("protocol", buffer.read_u8()?);
    result.add("hostname", buffer.read_string());
    result.add("map", buffer.read_string());
    result.add("game_dir", buffer.read_string());
    result.add("game_descr", buffer.read_string());
    let app_id = buffer.read_u16()?;
    result.add("steamappid", app_id);
    result.add("num_players", buffer.read_u8()?);
    result.add("max_players", buffer.read_u8()?);
    result.add("num_bots", buffer.read_u8()?);
    result.add("dedicated", read_char(buffer)?);
    result.add("os", read_char(buffer)?);
    result.add("password", buffer.read_u8()?);
    result.add("secure", buffer.read_u8()?);

    if app_id == THE_SHIP_APP_ID {
        result.add("game_mode", buffer.read_u8()?);
        result.add("witness_count", buffer.read_u8()?);
        result.add("witness_time", buffer.read_u8()?);
    }

    result.add("version", buffer.read_string());

    if buffer.is_empty() {
        return Ok(result);
    }

    let edf = buffer.read_u8()?;
    if edf & 0x80 != 0 {
        result.add("port", buffer.read_u16()?);
    }
    if edf & 0x10 != 0 {
        result.add("steam_id", buffer.read_u64()?);
    }
    if edf & 0x40 != 0 {
        result.add("sourcetv_port", buffer.read_u16()?);
        result.add("sourcetv_name", buffer.read_string());
    }
    if edf & 0x20 != 0 {
        result.add("keywords", buffer.read_string());
    }
    if edf & 0x01 != 0 {
        result.add("game_id", buffer.read_u64()?);
    }

    Ok(result)
}

fn decode_goldsource_details(buffer: &mut Buffer) -> Result<ResultSet, ProtocolError> {
    let mut result = ResultSet::new();
    result.add("address", buffer.read_string());
    result.add("hostname", buffer.read_string());
    result.add("map", buffer.read_string());
    result.add("game_dir", buffer.read_string());
    result.add("game_descr", buffer.read_string());
    result.add("num_players", buffer.read_u8()?);
    result.add("max_players", buffer.read_u8()?);
    result.add("version", buffer.read_u8()?);
    result.add("dedicated", read_char(buffer)?);
    result.add("os", read_char(buffer)?);
    result.add("password", buffer.read_u8()?);

    let is_mod = buffer.read_u8()?;
    result.add("ismod", is_mod);
    if is_mod == 1 {
        result.add("mod_urlinfo", buffer.read_string());
        result.add("mod_urldl", buffer.read_string());
        buffer.skip(1)?;
        result.add("mod_version", buffer.read_i32()?);
        result.add("mod_size", buffer.read_i32()?);
        result.add("mod_type", buffer.read_u8()?);
        result.add("mod_cldll", buffer.read_u8()?);
    }

    result.add("secure", buffer.read_u8()?);
    result.add("num_bots", buffer.read_u8()?);
    Ok(result)
}

fn decode_players(buffer: &mut Buffer) -> Result<ResultSet, ProtocolError> {
    let mut result = ResultSet::new();
    let count = buffer.read_u8()?;
    for _ in 0..count {
        result.add_player("id", buffer.read_u8()?);
        result.add_player("name", buffer.read_string());
        result.add_player("score", buffer.read_i32()?);
        result.add_player("time", buffer.read_f32()?);
    }
    Ok(result)
}

fn decode_rules(buffer: &mut Buffer) -> Result<ResultSet, ProtocolError> {
    let mut result = ResultSet::new();
    let count = buffer.read_u16()?;
    result.add("num_rules", count);
    for _ in 0..count {
        let name = buffer.read_string();
        let value = buffer.read_string();
        result.add(name, value);
    }
    Ok(result)
}
