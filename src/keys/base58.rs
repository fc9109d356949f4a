//! Base58 / Base58Check codec over `bitcoin::base58`
//!
//! Leading `'1'` digits map to leading zero bytes one-for-one, so any valid
//! string round-trips byte-for-byte through `decode` and `encode`. Errors are
//! re-expressed with the offending character's position.

use bitcoin::base58;

/// Errors during Base58 decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Base58Error {
    #[error("invalid base58 character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },
    #[error("base58 checksum mismatch: expected {}, found {}", hex::encode(expected), hex::encode(found))]
    Checksum { expected: [u8; 4], found: [u8; 4] },
    #[error("base58check payload shorter than its checksum ({0} bytes)")]
    TooShort(usize),
}

impl Base58Error {
    /// Locate the byte the decoder rejected. Decoding stops at the first bad
    /// byte, and for non-ASCII input that is the lead byte of the character.
    fn invalid(s: &str, byte: u8) -> Self {
        let index = s.bytes().position(|b| b == byte).unwrap_or(0);
        let ch = s.get(index..).and_then(|rest| rest.chars().next()).unwrap_or(byte as char);
        let position = s.get(..index).map_or(index, |head| head.chars().count());
        Base58Error::InvalidCharacter { ch, position }
    }

    fn from_check(s: &str, err: base58::Error) -> Self {
        match err {
            base58::Error::Decode(e) => Self::invalid(s, e.invalid_base58_character()),
            base58::Error::IncorrectChecksum(e) => {
                let (incorrect, expected) = e.incorrect_checksum();
                Base58Error::Checksum { expected: expected.to_le_bytes(), found: incorrect.to_le_bytes() }
            }
            base58::Error::TooShort(e) => Base58Error::TooShort(e.invalid_base58_length()),
            // Remaining variants are decode failures without a position
            _ => Self::invalid(s, 0),
        }
    }
}

/// Encode raw bytes (no checksum)
pub fn encode(data: &[u8]) -> String {
    base58::encode(data)
}

/// Decode a Base58 string into raw bytes (no checksum verification)
pub fn decode(s: &str) -> Result<Vec<u8>, Base58Error> {
    base58::decode(s).map_err(|e| Base58Error::invalid(s, e.invalid_base58_character()))
}

/// Encode bytes with a trailing 4-byte double-SHA256 checksum
pub fn encode_check(payload: &[u8]) -> String {
    base58::encode_check(payload)
}

/// Decode a Base58Check string, verifying and stripping the checksum
pub fn decode_check(s: &str) -> Result<Vec<u8>, Base58Error> {
    base58::decode_check(s).map_err(|e| Base58Error::from_check(s, e))
}
