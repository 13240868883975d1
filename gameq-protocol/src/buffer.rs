//! Forward-only binary cursor used by every protocol decoder.
//!
//! All reads are bounds-checked: asking for more bytes than remain fails with
//! [`ProtocolError::BufferUnderrun`] and leaves the cursor where it was. This is
//! what lets decoders reject truncated or malformed responses without panicking.

use crate::error::ProtocolError;
use bytes::Bytes;

/// Byte order used by the integer readers of a [`Buffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
    Native,
}

/// A read cursor over an immutable byte string.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Bytes,
    index: usize,
    order: ByteOrder,
}

macro_rules! read_number {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&mut self) -> Result<$ty, ProtocolError> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let bytes = self.read(WIDTH)?;
            let mut raw = [0u8; WIDTH];
            raw.copy_from_slice(&bytes);
            Ok(match self.order {
                ByteOrder::Little => <$ty>::from_le_bytes(raw),
                ByteOrder::Big => <$ty>::from_be_bytes(raw),
                ByteOrder::Native => <$ty>::from_ne_bytes(raw),
            })
        }
    };
}

impl Buffer {
    /// Creates a little-endian buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_order(data, ByteOrder::Little)
    }

    /// Creates a buffer whose integer readers use `order`.
    pub fn with_order(data: impl Into<Bytes>, order: ByteOrder) -> Self {
        Self {
            data: data.into(),
            index: 0,
            order,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Returns the whole underlying data, consumed or not.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the unread part of the buffer without advancing.
    pub fn rest(&self) -> Bytes {
        self.data.slice(self.index..)
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read offset from the start of the data.
    pub fn position(&self) -> usize {
        self.index
    }

    /// Reads the next `length` bytes.
    pub fn read(&mut self, length: usize) -> Result<Bytes, ProtocolError> {
        self.ensure(length)?;
        let bytes = self.data.slice(self.index..self.index + length);
        self.index += length;
        Ok(bytes)
    }

    /// Previews up to `length` bytes; returns fewer near the end.
    pub fn look_ahead(&self, length: usize) -> Bytes {
        let end = self.index.saturating_add(length).min(self.data.len());
        self.data.slice(self.index..end)
    }

    pub fn skip(&mut self, length: usize) -> Result<(), ProtocolError> {
        self.ensure(length)?;
        self.index += length;
        Ok(())
    }

    /// Seeks to an absolute offset, clamped to the last byte.
    pub fn jump_to(&mut self, index: usize) {
        self.index = index.min(self.data.len().saturating_sub(1));
    }

    /// Reads up to and consumes `delim`, or everything left if it never appears.
    pub fn read_bytes_until(&mut self, delim: u8) -> Bytes {
        let unread = &self.data[self.index..];
        match unread.iter().position(|&b| b == delim) {
            Some(pos) => {
                let bytes = self.data.slice(self.index..self.index + pos);
                self.index += pos + 1;
                bytes
            }
            None => {
                let bytes = self.rest();
                self.index = self.data.len();
                bytes
            }
        }
    }

    /// Reads a NUL-terminated string (lossy UTF-8).
    pub fn read_string(&mut self) -> String {
        self.read_string_with(0)
    }

    pub fn read_string_with(&mut self, delim: u8) -> String {
        String::from_utf8_lossy(&self.read_bytes_until(delim)).into_owned()
    }

    /// Reads up to the earliest of `delims` and reports which one ended the
    /// string. `None` means the rest of the buffer was returned.
    pub fn read_string_multi(&mut self, delims: &[u8]) -> (String, Option<u8>) {
        let unread = &self.data[self.index..];
        match unread.iter().position(|b| delims.contains(b)) {
            Some(pos) => {
                let found = unread[pos];
                let value = String::from_utf8_lossy(&unread[..pos]).into_owned();
                self.index += pos + 1;
                (value, Some(found))
            }
            None => {
                let value = String::from_utf8_lossy(unread).into_owned();
                self.index = self.data.len();
                (value, None)
            }
        }
    }

    /// Reads a string prefixed by a one byte length.
    ///
    /// Some formats send a length that overstates the string by `offset`
    /// bytes. With `read_offset` only the corrected length is consumed,
    /// otherwise the full advertised length is consumed and the extra bytes
    /// are dropped.
    pub fn read_pascal_string(
        &mut self,
        offset: usize,
        read_offset: bool,
    ) -> Result<Bytes, ProtocolError> {
        let start = self.index;
        let length = self.read_u8()? as usize;
        let actual = length.saturating_sub(offset);
        let result = if read_offset {
            self.read(actual)
        } else {
            self.read(length).map(|bytes| bytes.slice(..actual))
        };
        if result.is_err() {
            self.index = start;
        }
        result
    }

    /// Removes and returns the last byte of the whole buffer.
    ///
    /// Unlike every other reader this one works from the tail and shrinks the
    /// data; used for protocols whose final byte is a terminator.
    pub fn read_last(&mut self) -> Result<u8, ProtocolError> {
        let last = *self.data.last().ok_or(ProtocolError::BufferUnderrun {
            requested: 1,
            remaining: 0,
        })?;
        self.data.truncate(self.data.len() - 1);
        self.index = self.index.min(self.data.len());
        Ok(last)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.read_u8()? as i8)
    }

    read_number!(read_u16, u16);
    read_number!(read_i16, i16);
    read_number!(read_u32, u32);
    read_number!(read_i32, i32);
    read_number!(read_u64, u64);
    read_number!(read_i64, i64);
    read_number!(
        /// Reads an IEEE 754 single precision float.
        read_f32,
        f32
    );

    fn ensure(&self, length: usize) -> Result<(), ProtocolError> {
        let remaining = self.remaining();
        if length > remaining {
            return Err(ProtocolError::BufferUnderrun {
                requested: length,
                remaining,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_read_advances() {
        let mut buf = Buffer::new(&b"hello world"[..]);
        assert_eq!(buf.read(5).unwrap().as_ref(), b"hello");
        assert_eq!(buf.position(), 5);
        assert_eq!(buf.remaining(), 6);
    }

    #[test]
    fn test_read_underrun_keeps_cursor() {
        let mut buf = Buffer::new(&b"abc"[..]);
        buf.read(1).unwrap();
        let err = buf.read(5).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BufferUnderrun {
                requested: 5,
                remaining: 2
            }
        ));
        assert_eq!(buf.position(), 1);
    }

    #[test]
    fn test_read_string_sequence() {
        let mut buf = Buffer::new(&b"A\x00B\x00"[..]);
        assert_eq!(buf.read_string(), "A");
        assert_eq!(buf.read_string(), "B");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_string_without_delimiter() {
        let mut buf = Buffer::new(&b"no terminator"[..]);
        assert_eq!(buf.read_string(), "no terminator");
        assert_eq!(buf.remaining(), 0);
        // Reading from an exhausted buffer yields an empty string, not an error
        assert_eq!(buf.read_string(), "");
    }

    #[test]
    fn test_read_string_custom_delimiter() {
        let mut buf = Buffer::new(&b"key\\value\\"[..]);
        assert_eq!(buf.read_string_with(b'\\'), "key");
        assert_eq!(buf.read_string_with(b'\\'), "value");
    }

    #[test]
    fn test_read_string_multi() {
        let mut buf = Buffer::new(&b"one\ntwo\x00three"[..]);
        assert_eq!(buf.read_string_multi(b"\x00\n"), ("one".to_string(), Some(b'\n')));
        assert_eq!(buf.read_string_multi(b"\x00\n"), ("two".to_string(), Some(0)));
        assert_eq!(buf.read_string_multi(b"\x00\n"), ("three".to_string(), None));
    }

    #[test]
    fn test_look_ahead_does_not_advance() {
        let mut buf = Buffer::new(&b"xyz"[..]);
        assert_eq!(buf.look_ahead(2).as_ref(), b"xy");
        assert_eq!(buf.position(), 0);
        buf.skip(2).unwrap();
        // Previewing past the end returns what is left
        assert_eq!(buf.look_ahead(10).as_ref(), b"z");
    }

    #[test]
    fn test_skip_past_end() {
        let mut buf = Buffer::new(&b"ab"[..]);
        assert!(buf.skip(3).is_err());
        assert_eq!(buf.position(), 0);
        buf.skip(2).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_jump_to_clamps() {
        let mut buf = Buffer::new(&b"abcd"[..]);
        buf.jump_to(2);
        assert_eq!(buf.read_u8().unwrap(), b'c');
        buf.jump_to(100);
        assert_eq!(buf.position(), 3);

        let mut empty = Buffer::new(Bytes::new());
        empty.jump_to(5);
        assert_eq!(empty.position(), 0);
    }

    #[test]
    fn test_pascal_string() {
        let mut buf = Buffer::new(&b"\x05hello\x03abc"[..]);
        assert_eq!(buf.read_pascal_string(0, false).unwrap().as_ref(), b"hello");
        assert_eq!(buf.read_pascal_string(0, false).unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_pascal_string_overstated_length() {
        // Length byte counts itself: 6 advertised, 5 real
        let mut buf = Buffer::new(&b"\x06hello!rest"[..]);
        assert_eq!(buf.read_pascal_string(1, true).unwrap().as_ref(), b"hello");
        assert_eq!(buf.read(1).unwrap().as_ref(), b"!");

        // Same prefix, but consume the full advertised length
        let mut buf = Buffer::new(&b"\x06hello!rest"[..]);
        assert_eq!(buf.read_pascal_string(1, false).unwrap().as_ref(), b"hello");
        assert_eq!(buf.rest().as_ref(), b"rest");
    }

    #[test]
    fn test_pascal_string_underrun_restores_cursor() {
        let mut buf = Buffer::new(&b"\x09short"[..]);
        assert!(buf.read_pascal_string(0, false).is_err());
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_read_last() {
        let mut buf = Buffer::new(&b"\x01\x02\x03"[..]);
        assert_eq!(buf.read_last().unwrap(), 3);
        assert_eq!(buf.remaining(), 2);
        assert_eq!(buf.read_u8().unwrap(), 1);
        assert_eq!(buf.read_last().unwrap(), 2);
        assert!(buf.is_empty());
        assert!(buf.read_last().is_err());
    }

    #[test]
    fn test_read_last_clamps_cursor() {
        let mut buf = Buffer::new(&b"ab"[..]);
        buf.skip(2).unwrap();
        assert_eq!(buf.read_last().unwrap(), b'b');
        assert_eq!(buf.position(), 1);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_byte_orders() {
        let mut le = Buffer::new(&b"\x01\x02\x03\x04"[..]);
        assert_eq!(le.read_u32().unwrap(), 0x0403_0201);

        let mut be = Buffer::with_order(&b"\x01\x02\x03\x04"[..], ByteOrder::Big);
        assert_eq!(be.read_u32().unwrap(), 0x0102_0304);

        let mut ne = Buffer::with_order(&b"\x01\x02"[..], ByteOrder::Native);
        assert_eq!(ne.read_u16().unwrap(), u16::from_ne_bytes([1, 2]));
    }

    #[test]
    fn test_signed_readers() {
        let mut buf = Buffer::new(&b"\xFF\xFF\xFF\xFF\xFE\xFF\x80"[..]);
        assert_eq!(buf.read_i32().unwrap(), -1);
        assert_eq!(buf.read_i16().unwrap(), -2);
        assert_eq!(buf.read_i8().unwrap(), -128);
    }

    #[test]
    fn test_read_f32() {
        let mut buf = Buffer::new(1.5f32.to_le_bytes().to_vec());
        assert_eq!(buf.read_f32().unwrap(), 1.5);
    }

    proptest! {
        #[test]
        fn prop_read_returns_prefix(data in proptest::collection::vec(any::<u8>(), 0..256), n in 0usize..300) {
            let mut buf = Buffer::new(data.clone());
            if n <= data.len() {
                let bytes = buf.read(n).unwrap();
                prop_assert_eq!(bytes.as_ref(), &data[..n]);
                prop_assert_eq!(buf.position(), n);
            } else {
                prop_assert!(buf.read(n).is_err());
                prop_assert_eq!(buf.position(), 0);
            }
        }

        #[test]
        fn prop_i16_roundtrip(value: i16) {
            let mut le = Buffer::new(value.to_le_bytes().to_vec());
            prop_assert_eq!(le.read_i16().unwrap(), value);
            let mut be = Buffer::with_order(value.to_be_bytes().to_vec(), ByteOrder::Big);
            prop_assert_eq!(be.read_i16().unwrap(), value);
            let mut ne = Buffer::with_order(value.to_ne_bytes().to_vec(), ByteOrder::Native);
            prop_assert_eq!(ne.read_i16().unwrap(), value);
        }

        #[test]
        fn prop_i32_roundtrip(value: i32) {
            let mut le = Buffer::new(value.to_le_bytes().to_vec());
            prop_assert_eq!(le.read_i32().unwrap(), value);
            let mut be = Buffer::with_order(value.to_be_bytes().to_vec(), ByteOrder::Big);
            prop_assert_eq!(be.read_i32().unwrap(), value);
            let mut ne = Buffer::with_order(value.to_ne_bytes().to_vec(), ByteOrder::Native);
            prop_assert_eq!(ne.read_i32().unwrap(), value);
        }

        #[test]
        fn prop_u64_roundtrip(value: u64) {
            let mut be = Buffer::with_order(value.to_be_bytes().to_vec(), ByteOrder::Big);
            prop_assert_eq!(be.read_u64().unwrap(), value);
            prop_assert!(be.is_empty());
        }
    }
}
