//! Chunk transport encoding.
//!
//! Chunk bytes travel inside JSON bodies and SSE `data:` lines, so they are
//! carried as standard padded base64. The encoding is opaque to everything
//! except the producer buffer (encode) and the subscriber (decode).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Encode raw output bytes for transport.
pub fn encode_chunk(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a transported chunk back into raw bytes.
pub fn decode_chunk(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_text_survives() {
        let text = "build ✓ → done 🚀\n";
        let decoded = decode_chunk(&encode_chunk(text.as_bytes())).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), text);
    }

    #[test]
    fn arbitrary_bytes_survive() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode_chunk(&encode_chunk(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn empty_input() {
        assert_eq!(encode_chunk(b""), "");
        assert_eq!(decode_chunk("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_chunk("not base64!!").is_err());
    }
}
