//! Outbound encoding: message builder and the frame accumulator.

use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum::{adler32, ChecksumMode};
use crate::xtea::{self, XteaKey};
use crate::{latin1, Position, CHECKSUM_LEN, HEADER_LEN, MAX_OUTGOING_PAYLOAD, OUTGOING_PREFIX_LEN};

/// Values that can be appended to an [`OutgoingMessage`].
pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);
}

macro_rules! impl_encode_scalar {
    ($($t:ty => $put:ident),*) => {
        $(
            impl Encode for $t {
                fn encode(&self, buf: &mut BytesMut) {
                    buf.$put(*self);
                }
            }
        )*
    };
}

impl_encode_scalar!(
    u8 => put_u8,
    u16 => put_u16_le,
    u32 => put_u32_le,
    u64 => put_u64_le,
    i8 => put_i8,
    i16 => put_i16_le,
    i32 => put_i32_le,
    i64 => put_i64_le
);

impl Encode for str {
    /// Transcodes to Latin-1 and writes a `u16` length prefix.
    fn encode(&self, buf: &mut BytesMut) {
        let bytes = latin1::encode(self);
        let len = bytes.len().min(u16::MAX as usize);
        buf.put_u16_le(len as u16);
        buf.put_slice(&bytes[..len]);
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_str().encode(buf);
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, buf: &mut BytesMut) {
        (**self).encode(buf);
    }
}

impl Encode for Position {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.x);
        buf.put_u16_le(self.y);
        buf.put_u8(self.z);
    }
}

/// One or more server messages serialized back to back.
///
/// The result carries no framing; it is appended to a connection's
/// [`OutgoingBuffer`] which adds the transport prefix when sealed.
#[derive(Debug, Default, Clone)]
pub struct OutgoingMessage {
    buf: BytesMut,
}

impl OutgoingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Encode>(&mut self, value: T) -> &mut Self {
        value.encode(&mut self.buf);
        self
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Hands out the encoded bytes and leaves the builder empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// Append-only payload accumulator with a reserved transport prefix.
///
/// Layout: `[len:u16][checksum:u32][inner_len:u16][payload..][padding]`. The
/// prefix is only filled in by [`seal_plain`](Self::seal_plain) or
/// [`seal_encrypted`](Self::seal_encrypted).
pub struct OutgoingBuffer {
    buffer: Box<[u8]>,
    len: usize,
}

impl OutgoingBuffer {
    /// Prefix, payload cap and room for one block of cipher padding.
    pub const CAPACITY: usize = OUTGOING_PREFIX_LEN + MAX_OUTGOING_PAYLOAD + xtea::BLOCK_LEN;

    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; Self::CAPACITY].into_boxed_slice(),
            len: 0,
        }
    }

    /// Payload bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        MAX_OUTGOING_PAYLOAD - self.len
    }

    pub fn fits(&self, n: usize) -> bool {
        n <= self.remaining()
    }

    /// Appends `bytes`, or returns `false` and leaves the buffer untouched
    /// when they would exceed the payload cap.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if !self.fits(bytes.len()) {
            return false;
        }
        let start = OUTGOING_PREFIX_LEN + self.len;
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[OUTGOING_PREFIX_LEN..OUTGOING_PREFIX_LEN + self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Frames the payload as `len | checksum(0) | payload` and clears it.
    pub fn seal_plain(&mut self) -> Bytes {
        let start = OUTGOING_PREFIX_LEN - HEADER_LEN - CHECKSUM_LEN;
        let end = OUTGOING_PREFIX_LEN + self.len;

        let frame_len = (CHECKSUM_LEN + self.len) as u16;
        self.buffer[start..start + HEADER_LEN].copy_from_slice(&frame_len.to_le_bytes());
        self.buffer[start + HEADER_LEN..OUTGOING_PREFIX_LEN].fill(0);

        let frame = Bytes::copy_from_slice(&self.buffer[start..end]);
        self.clear();
        frame
    }

    /// Frames the payload as `len | checksum | XTEA(inner_len | payload | pad)`
    /// and clears it.
    ///
    /// `sequence` is written as the checksum in [`ChecksumMode::Sequence`].
    pub fn seal_encrypted(&mut self, key: &XteaKey, mode: ChecksumMode, sequence: u32) -> Bytes {
        let cipher_start = HEADER_LEN + CHECKSUM_LEN;
        self.buffer[cipher_start..OUTGOING_PREFIX_LEN].copy_from_slice(&(self.len as u16).to_le_bytes());

        let mut end = OUTGOING_PREFIX_LEN + self.len;
        let pad = xtea::padding_for(end - cipher_start);
        self.buffer[end..end + pad].fill(0);
        end += pad;

        // Always aligned after padding.
        let _ = xtea::encrypt(&mut self.buffer[cipher_start..end], key);

        let checksum = match mode {
            ChecksumMode::Adler => adler32(&self.buffer[cipher_start..end]),
            ChecksumMode::Sequence => sequence,
        };
        self.buffer[HEADER_LEN..cipher_start].copy_from_slice(&checksum.to_le_bytes());
        self.buffer[..HEADER_LEN].copy_from_slice(&((end - HEADER_LEN) as u16).to_le_bytes());

        let frame = Bytes::copy_from_slice(&self.buffer[..end]);
        self.clear();
        frame
    }
}

impl Default for OutgoingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutgoingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingBuffer").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_encoding_is_little_endian() {
        let mut msg = OutgoingMessage::new();
        msg.add::<u8>(0x1F).add::<u16>(0x0102).add::<u32>(0x0304_0506);
        assert_eq!(msg.as_bytes(), &[0x1F, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn test_string_and_position_encoding() {
        let mut msg = OutgoingMessage::new();
        msg.add("Jörg").add(Position::new(1000, 2000, 7));
        assert_eq!(
            msg.as_bytes(),
            &[0x04, 0x00, b'J', 0xF6, b'r', b'g', 0xE8, 0x03, 0xD0, 0x07, 0x07]
        );
    }

    #[test]
    fn test_take_empties_builder() {
        let mut msg = OutgoingMessage::new();
        msg.add::<u8>(1);
        let bytes = msg.take();
        assert_eq!(&bytes[..], &[1]);
        assert!(msg.is_empty());
    }

    #[test]
    fn test_append_respects_payload_cap() {
        let mut buffer = OutgoingBuffer::new();
        assert!(buffer.append(&vec![7u8; MAX_OUTGOING_PAYLOAD - 1]));
        assert!(!buffer.append(&[1, 2]));
        assert_eq!(buffer.len(), MAX_OUTGOING_PAYLOAD - 1);
        assert!(buffer.append(&[1]));
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_seal_plain_layout() {
        let mut buffer = OutgoingBuffer::new();
        buffer.append(&[0x1F, 0xAA, 0xBB]);
        let frame = buffer.seal_plain();
        assert_eq!(&frame[..], &[0x07, 0x00, 0, 0, 0, 0, 0x1F, 0xAA, 0xBB]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_seal_encrypted_is_aligned_and_checksummed() {
        let key = XteaKey::new([1, 2, 3, 4]);
        let mut buffer = OutgoingBuffer::new();
        buffer.append(&[0x1D]);
        let frame = buffer.seal_encrypted(&key, ChecksumMode::Adler, 0);

        assert_eq!((frame.len() - 6) % 8, 0);
        let declared = u16::from_le_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(declared + 2, frame.len());
        let checksum = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        assert_eq!(checksum, adler32(&frame[6..]));

        let mut inner = frame[6..].to_vec();
        xtea::decrypt(&mut inner, &key).unwrap();
        assert_eq!(&inner[..3], &[0x01, 0x00, 0x1D]);
    }

    #[test]
    fn test_seal_encrypted_sequence_checksum() {
        let key = XteaKey::new([4, 3, 2, 1]);
        let mut buffer = OutgoingBuffer::new();
        buffer.append(b"abc");
        let frame = buffer.seal_encrypted(&key, ChecksumMode::Sequence, 42);
        assert_eq!(u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]), 42);
    }

    #[test]
    fn test_full_buffer_seals() {
        let key = XteaKey::new([0; 4]);
        let mut buffer = OutgoingBuffer::new();
        assert!(buffer.append(&vec![0x55; MAX_OUTGOING_PAYLOAD]));
        let frame = buffer.seal_encrypted(&key, ChecksumMode::Adler, 0);
        assert_eq!((frame.len() - 6) % 8, 0);
        assert!(frame.len() <= OutgoingBuffer::CAPACITY);
    }
}
