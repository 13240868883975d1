//! Built-in protocol families.

pub mod gamespy3;
pub mod source;

pub use gamespy3::GameSpy3;
pub use source::Source;

/// Decodes ISO-8859-1 bytes; every byte maps to the code point of the same value.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1() {
        assert_eq!(latin1(b"caf\xE9"), "café");
        assert_eq!(latin1(b""), "");
    }
}
