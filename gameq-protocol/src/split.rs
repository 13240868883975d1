//! Reassembly of responses split across several datagrams.
//!
//! Protocols parse their own fragment headers; the [`Reassembler`] takes the
//! resulting [`Fragment`]s, puts them back in order, undoes bzip2 compression
//! where a fragment declares it, and joins the payloads.

use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};
use std::io::Read;
use tracing::debug;

/// Compression metadata carried by a split set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub decompressed_len: usize,
    pub checksum: u32,
}

/// One piece of a split response with its header already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub index: u32,
    pub payload: Bytes,
    pub compression: Option<Compression>,
}

impl Fragment {
    pub fn new(index: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            payload: payload.into(),
            compression: None,
        }
    }

    pub fn compressed(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }
}

/// How fragment boundaries are treated when joining payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Boundary {
    /// Payloads are concatenated as they are.
    #[default]
    Keep,
    /// GameSpy3 servers repeat the variable cut at the end of one fragment at
    /// the start of the next, along with the section header. Both copies are
    /// removed before joining.
    ElideDuplicateVariables,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reassembler {
    boundary: Boundary,
}

impl Reassembler {
    pub fn new(boundary: Boundary) -> Self {
        Self { boundary }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Parses every chunk with `parse` and joins the fragments.
    pub fn reassemble<F>(&self, chunks: &[Bytes], mut parse: F) -> Result<Bytes, ProtocolError>
    where
        F: FnMut(&Bytes) -> Result<Fragment, ProtocolError>,
    {
        let fragments = chunks
            .iter()
            .map(&mut parse)
            .collect::<Result<Vec<_>, _>>()?;
        self.reassemble_fragments(fragments)
    }

    pub fn reassemble_fragments(
        &self,
        mut fragments: Vec<Fragment>,
    ) -> Result<Bytes, ProtocolError> {
        if fragments.is_empty() {
            return Err(ProtocolError::MissingFragment);
        }
        if fragments.len() == 1 && fragments[0].compression.is_none() {
            return Ok(fragments.remove(0).payload);
        }

        // Stable, so duplicates keep arrival order
        fragments.sort_by_key(|fragment| fragment.index);
        debug!(count = fragments.len(), "reassembling split response");

        if let Some(compression) = fragments.iter().find_map(|f| f.compression) {
            let joined = concat(fragments.iter().map(|f| f.payload.as_ref()));
            return decompress(&joined, compression);
        }

        match self.boundary {
            Boundary::Keep => Ok(concat(fragments.iter().map(|f| f.payload.as_ref()))),
            Boundary::ElideDuplicateVariables => {
                let mut payloads: Vec<Vec<u8>> =
                    fragments.into_iter().map(|f| f.payload.to_vec()).collect();
                elide_duplicate_variables(&mut payloads);
                Ok(concat(payloads.iter().map(Vec::as_slice)))
            }
        }
    }
}

fn concat<'a>(parts: impl Iterator<Item = &'a [u8]>) -> Bytes {
    let mut out = BytesMut::new();
    for part in parts {
        out.extend_from_slice(part);
    }
    out.freeze()
}

fn decompress(data: &[u8], compression: Compression) -> Result<Bytes, ProtocolError> {
    let mut out = Vec::with_capacity(compression.decompressed_len);
    bzip2::read::BzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::DecompressionFailed(e.to_string()))?;
    if out.len() != compression.decompressed_len {
        return Err(ProtocolError::Decompression {
            expected: compression.decompressed_len,
            actual: out.len(),
        });
    }
    Ok(Bytes::from(out))
}

/// Removes variables duplicated across adjacent fragment boundaries.
///
/// First pass: when the last variable of fragment `i` is contained in the
/// first value of fragment `i + 1`, it was cut short and re-sent, so the
/// trailing `\0var\0` of fragment `i` collapses to `\0`. Second pass: a
/// fragment whose leading section header also appears in the previous
/// fragment loses every copy of that header plus the two bytes after it.
pub fn elide_duplicate_variables(packets: &mut [Vec<u8>]) {
    for i in 0..packets.len().saturating_sub(1) {
        let current = &packets[i];
        let fst = &current[..current.len().saturating_sub(1)];
        let fstvar = match fst.iter().rposition(|&b| b == 0) {
            Some(pos) => &fst[pos + 1..],
            None => fst.get(1..).unwrap_or_default(),
        };

        let next = &packets[i + 1];
        let snd = match next.iter().position(|&b| b == 0) {
            Some(pos) => next.get(pos + 2..).unwrap_or_default(),
            None => next.get(2..).unwrap_or_default(),
        };
        let sndvar = match snd.iter().position(|&b| b == 0) {
            Some(pos) => &snd[..pos],
            None => &[][..],
        };

        // A lone "0" counts as empty
        if fstvar.is_empty() || fstvar == b"0" || !contains(sndvar, fstvar) {
            continue;
        }

        let tail = fstvar.len() + 2;
        let ends_with_var = current.len() >= tail
            && current[current.len() - tail] == 0
            && current[current.len() - 1] == 0
            && !fstvar.contains(&0);
        if ends_with_var {
            let keep = current.len() - tail + 1;
            packets[i].truncate(keep);
        }
    }

    for i in 1..packets.len() {
        let prefix = match packets[i].iter().position(|&b| b == 0) {
            Some(pos) => packets[i][..pos].to_vec(),
            None => packets[i].clone(),
        };
        if prefix.is_empty() || !contains(&packets[i - 1], &prefix) {
            continue;
        }
        let stripped = remove_all(&packets[i], &prefix);
        packets[i] = stripped.get(2..).unwrap_or_default().to_vec();
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || haystack
            .windows(needle.len())
            .any(|window| window == needle)
}

fn remove_all(data: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(needle) {
            i += needle.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bz(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_single_fragment_passes_through() {
        let joined = Reassembler::default()
            .reassemble_fragments(vec![Fragment::new(3, &b"only"[..])])
            .unwrap();
        assert_eq!(joined.as_ref(), b"only");
    }

    #[test]
    fn test_orders_by_index() {
        let joined = Reassembler::default()
            .reassemble_fragments(vec![
                Fragment::new(1, &b"abc"[..]),
                Fragment::new(0, &b"def"[..]),
            ])
            .unwrap();
        assert_eq!(joined.as_ref(), b"defabc");
    }

    #[test]
    fn test_reassemble_with_header_parser() {
        let chunks = vec![
            Bytes::from_static(b"\x02world"),
            Bytes::from_static(b"\x00hello"),
            Bytes::from_static(b"\x01 "),
        ];
        let joined = Reassembler::default()
            .reassemble(&chunks, |chunk| {
                Ok(Fragment::new(u32::from(chunk[0]), chunk.slice(1..)))
            })
            .unwrap();
        assert_eq!(joined.as_ref(), b"hello world");
    }

    #[test]
    fn test_parser_error_propagates() {
        let chunks = vec![Bytes::from_static(b"x")];
        let err = Reassembler::default()
            .reassemble(&chunks, |_| Err(ProtocolError::Malformed("bad".into())))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_no_fragments() {
        let err = Reassembler::default()
            .reassemble_fragments(Vec::new())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingFragment));
    }

    #[test]
    fn test_compressed_set() {
        let plain = b"\xFF\xFF\xFF\xFFDcompressed players payload".repeat(8);
        let packed = bz(&plain);
        let (a, b) = packed.split_at(packed.len() / 2);
        let compression = Compression {
            decompressed_len: plain.len(),
            checksum: 0,
        };

        let joined = Reassembler::default()
            .reassemble_fragments(vec![
                Fragment::new(1, b.to_vec()),
                Fragment::new(0, a.to_vec()).compressed(compression),
            ])
            .unwrap();
        assert_eq!(joined.as_ref(), plain.as_slice());
    }

    #[test]
    fn test_compressed_length_mismatch() {
        let packed = bz(b"twelve bytes");
        let compression = Compression {
            decompressed_len: 20,
            checksum: 0,
        };
        let err = Reassembler::default()
            .reassemble_fragments(vec![Fragment::new(0, packed).compressed(compression)])
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Decompression {
                expected: 20,
                actual: 12
            }
        ));
    }

    #[test]
    fn test_garbage_compressed_data() {
        let compression = Compression {
            decompressed_len: 4,
            checksum: 0,
        };
        let err = Reassembler::default()
            .reassemble_fragments(vec![Fragment::new(0, &b"not bzip2"[..]).compressed(compression)])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DecompressionFailed(_)));
    }

    #[test]
    fn test_elision_keeps_token_once() {
        // "bo" was cut at the end of the first fragment and re-sent as "bob"
        let first = b"\x00player_\x00\x00alice\x00bo\x00".to_vec();
        let second = b"player_\x00\x01bob\x00carol\x00\x00".to_vec();

        let joined = Reassembler::new(Boundary::ElideDuplicateVariables)
            .reassemble_fragments(vec![Fragment::new(0, first), Fragment::new(1, second)])
            .unwrap();
        assert_eq!(joined.as_ref(), b"\x00player_\x00\x00alice\x00bob\x00carol\x00\x00");

        let count = joined.windows(7).filter(|w| *w == b"player_").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_elision_leaves_unrelated_fragments() {
        let mut packets = vec![b"\x00a\x00b\x00".to_vec(), b"c\x00\x00d\x00".to_vec()];
        elide_duplicate_variables(&mut packets);
        assert_eq!(packets[0], b"\x00a\x00b\x00");
        assert_eq!(packets[1], b"c\x00\x00d\x00");
    }

    #[test]
    fn test_elision_treats_zero_variable_as_empty() {
        let mut packets = vec![b"\x00a\x000\x00".to_vec(), b"x\x00\x0010\x00".to_vec()];
        elide_duplicate_variables(&mut packets);
        assert_eq!(packets[0], b"\x00a\x000\x00");
        assert_eq!(packets[1], b"x\x00\x0010\x00");
    }

    #[test]
    fn test_elision_prefix_without_nul_is_whole_fragment() {
        let mut packets = vec![b"\x00abc\x00def\x00".to_vec(), b"abc".to_vec()];
        elide_duplicate_variables(&mut packets);
        assert_eq!(packets[0], b"\x00abc\x00def\x00");
        assert!(packets[1].is_empty());
    }

    #[test]
    fn test_keep_does_not_elide() {
        let first = b"\x00player_\x00\x00al\x00".to_vec();
        let second = b"player_\x00\x00alice\x00".to_vec();
        let joined = Reassembler::default()
            .reassemble_fragments(vec![
                Fragment::new(0, first.clone()),
                Fragment::new(1, second.clone()),
            ])
            .unwrap();
        assert_eq!(joined.as_ref(), [first, second].concat().as_slice());
    }
}
