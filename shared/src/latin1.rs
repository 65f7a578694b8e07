//! Latin-1 (ISO-8859-1) ⇄ UTF-8 transcoding for wire strings.
//!
//! Every byte of Latin-1 maps to the code point of the same value, so decoding
//! cannot fail. Encoding drops characters above U+00FF instead of failing.

/// Decodes Latin-1 bytes into a UTF-8 `String`.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encodes a UTF-8 string as Latin-1, skipping characters it cannot represent.
pub fn encode(s: &str) -> Vec<u8> {
    s.chars()
        .filter_map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}
