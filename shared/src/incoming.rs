//! Inbound cursor over one frame.
//!
//! The buffer holds the whole frame including its 2-byte length header.
//! Reads never fail: a read that would cross the declared length yields the
//! zero/empty value of the requested type and leaves the cursor in place, and
//! the caller decides whether an unexpected zero aborts the frame.

use crate::xtea::{self, XteaKey};
use crate::{latin1, Position, CHECKSUM_LEN, HEADER_LEN, MAX_BODY_LEN};

/// Bytes in front of the decrypted payload: header, checksum and inner length.
const ENCRYPTED_PAYLOAD_OFFSET: usize = HEADER_LEN + CHECKSUM_LEN + 2;

/// Fixed-capacity inbound frame buffer with a read cursor.
pub struct IncomingMessage {
    buffer: Box<[u8]>,
    /// Read cursor; starts right after the header.
    pos: usize,
    /// Total frame length including the header.
    length: usize,
}

/// Values that can be read sequentially from an [`IncomingMessage`].
pub trait Decode: Sized {
    fn decode(msg: &mut IncomingMessage) -> Self;
}

/// Fixed-size little-endian scalars, which can also be re-read backwards.
pub trait Scalar: Decode {
    const SIZE: usize;
    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }

            impl Decode for $t {
                fn decode(msg: &mut IncomingMessage) -> Self {
                    msg.take(<$t as Scalar>::SIZE)
                        .map(<$t as Scalar>::from_le_slice)
                        .unwrap_or_default()
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Decode for String {
    /// `u16` length prefix followed by that many Latin-1 bytes.
    fn decode(msg: &mut IncomingMessage) -> Self {
        let n = msg.get::<u16>() as usize;
        if n == 0 {
            return String::new();
        }
        msg.take(n).map(latin1::decode).unwrap_or_default()
    }
}

impl Decode for Position {
    fn decode(msg: &mut IncomingMessage) -> Self {
        let x = msg.get::<u16>();
        let y = msg.get::<u16>();
        let z = msg.get::<u8>();
        Position { x, y, z }
    }
}

impl IncomingMessage {
    pub const CAPACITY: usize = HEADER_LEN + MAX_BODY_LEN;

    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; Self::CAPACITY].into_boxed_slice(),
            pos: HEADER_LEN,
            length: 0,
        }
    }

    /// Builds a message from a complete frame (header included).
    pub fn from_frame(frame: &[u8]) -> Self {
        let mut msg = Self::new();
        let n = frame.len().min(Self::CAPACITY);
        msg.buffer[..n].copy_from_slice(&frame[..n]);
        msg.length = n;
        msg
    }

    /// Reads the next value.
    pub fn get<T: Decode>(&mut self) -> T {
        T::decode(self)
    }

    /// Steps back over the previous scalar and returns it.
    pub fn get_prev<T: Scalar>(&mut self) -> T {
        if self.pos < T::SIZE {
            return T::from_le_slice(&[0u8; 8][..T::SIZE]);
        }
        self.pos -= T::SIZE;
        T::from_le_slice(&self.buffer[self.pos..self.pos + T::SIZE])
    }

    /// Takes `n` raw bytes, or nothing if fewer remain.
    pub fn take(&mut self, n: usize) -> Option<&[u8]> {
        if self.remaining() < n {
            return None;
        }
        let start = self.pos;
        self.pos += n;
        Some(&self.buffer[start..start + n])
    }

    /// Length written in the 2-byte header slot.
    pub fn header_len(&self) -> u16 {
        u16::from_le_bytes([self.buffer[0], self.buffer[1]])
    }

    /// Writes `n` into the header slot and declares an `n` byte body.
    pub fn set_header_len(&mut self, n: u16) {
        self.buffer[..HEADER_LEN].copy_from_slice(&n.to_le_bytes());
        self.truncate(usize::from(n));
    }

    /// The header slot, for reading a frame header into.
    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..HEADER_LEN]
    }

    /// The body region declared by the last [`truncate`](Self::truncate).
    pub fn body_mut(&mut self) -> &mut [u8] {
        let end = self.length.max(HEADER_LEN);
        &mut self.buffer[HEADER_LEN..end]
    }

    /// Everything after the header slot, regardless of the declared length.
    pub fn body_region_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[HEADER_LEN..]
    }

    /// The whole backing buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Unread bytes of the frame.
    pub fn remaining_slice(&self) -> &[u8] {
        &self.buffer[self.pos..self.length.max(self.pos)]
    }

    pub fn remaining_slice_mut(&mut self) -> &mut [u8] {
        let end = self.length.max(self.pos);
        &mut self.buffer[self.pos..end]
    }

    pub fn remaining(&self) -> usize {
        self.length.saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek_to(&mut self, n: usize) {
        self.pos = n.min(self.length.max(HEADER_LEN));
    }

    /// Moves the cursor forward, stopping at the end of the frame.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.length.max(self.pos));
    }

    /// Declares a body of `n` bytes after the header.
    pub fn truncate(&mut self, n: usize) {
        self.length = (n + HEADER_LEN).min(Self::CAPACITY);
    }

    /// Total frame length including the header.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn reset(&mut self) {
        self.pos = HEADER_LEN;
        self.length = 0;
    }

    /// Decrypts everything after the checksum slot and trims the padding.
    ///
    /// On success the cursor sits on the first payload byte (the opcode).
    /// Fails without touching the buffer when the encrypted region is empty
    /// or not a multiple of 8, and fails after decrypting when the inner
    /// length does not fit the frame.
    pub fn decrypt(&mut self, key: &XteaKey) -> bool {
        let start = HEADER_LEN + CHECKSUM_LEN;
        if self.length <= start || (self.length - start) % xtea::BLOCK_LEN != 0 {
            return false;
        }

        if xtea::decrypt(&mut self.buffer[start..self.length], key).is_err() {
            return false;
        }

        self.pos = start;
        let inner = self.get::<u16>() as usize;
        if inner + ENCRYPTED_PAYLOAD_OFFSET > self.length {
            return false;
        }

        self.length = ENCRYPTED_PAYLOAD_OFFSET + inner;
        true
    }
}

impl Default for IncomingMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("pos", &self.pos)
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outgoing::OutgoingMessage;
    use crate::ChecksumMode;
    use crate::OutgoingBuffer;

    fn frame_with_body(body: &[u8]) -> IncomingMessage {
        let mut frame = (body.len() as u16).to_le_bytes().to_vec();
        frame.extend_from_slice(body);
        IncomingMessage::from_frame(&frame)
    }

    #[test]
    fn test_sequential_scalars() {
        let mut msg = frame_with_body(&[0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(msg.header_len(), 7);
        assert_eq!(msg.get::<u8>(), 0x01);
        assert_eq!(msg.get::<u16>(), 0x1234);
        assert_eq!(msg.get::<u32>(), 0x1234_5678);
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_read_past_end_yields_zero_and_keeps_cursor() {
        let mut msg = frame_with_body(&[0xAA, 0xBB]);
        assert_eq!(msg.get::<u32>(), 0);
        assert_eq!(msg.position(), HEADER_LEN);
        assert_eq!(msg.get::<u16>(), 0xBBAA);
        assert_eq!(msg.get::<u8>(), 0);
        assert_eq!(msg.get::<String>(), "");
    }

    #[test]
    fn test_string_is_transcoded_from_latin1() {
        let mut msg = frame_with_body(&[0x04, 0x00, b'J', 0xF6, b'r', b'g', 0x09]);
        assert_eq!(msg.get::<String>(), "Jörg");
        assert_eq!(msg.get::<u8>(), 0x09);
    }

    #[test]
    fn test_truncated_string_reads_empty() {
        let mut msg = frame_with_body(&[0x10, 0x00, b'a', b'b']);
        assert_eq!(msg.get::<String>(), "");
    }

    #[test]
    fn test_position() {
        let mut msg = frame_with_body(&[0xE8, 0x03, 0xD0, 0x07, 0x07]);
        assert_eq!(msg.get::<Position>(), Position::new(1000, 2000, 7));
    }

    #[test]
    fn test_get_prev_rereads_last_scalar() {
        let mut msg = frame_with_body(&[3, 1, 2, 3]);
        let count = msg.get::<u8>();
        msg.advance(count as usize);
        let backwards: Vec<u8> = (0..count).map(|_| msg.get_prev::<u8>()).collect();
        assert_eq!(backwards, vec![3, 2, 1]);
    }

    #[test]
    fn test_advance_stops_at_frame_end() {
        let mut msg = frame_with_body(&[1, 2, 3]);
        msg.advance(100);
        assert_eq!(msg.remaining(), 0);
        assert_eq!(msg.position(), msg.len());
    }

    #[test]
    fn test_header_slot_and_truncate() {
        let mut msg = IncomingMessage::new();
        msg.header_mut().copy_from_slice(&[0x10, 0x00]);
        assert_eq!(msg.header_len(), 16);
        msg.truncate(16);
        assert_eq!(msg.body_mut().len(), 16);
        assert_eq!(msg.len(), 18);

        msg.reset();
        assert!(msg.is_empty());
        assert_eq!(msg.position(), HEADER_LEN);
    }

    #[test]
    fn test_set_header_len_overwrites_slot() {
        let mut msg = IncomingMessage::new();
        msg.as_bytes_mut()[..6].copy_from_slice(&[0xFF, 0xFF, 0x02, 0x00, b'o', b'k']);
        msg.set_header_len(4);
        assert_eq!(msg.header_len(), 4);
        assert_eq!(msg.len(), 6);
        assert_eq!(msg.get::<String>(), "ok");
    }

    #[test]
    fn test_decrypt_refuses_misaligned_frames() {
        let key = XteaKey::new([1, 2, 3, 4]);
        // 2 header + 4 checksum + 9 bytes of "ciphertext".
        let mut msg = frame_with_body(&[0u8; 13]);
        msg.get::<u32>();
        let before = msg.as_bytes()[..15].to_vec();
        assert!(!msg.decrypt(&key));
        assert_eq!(&msg.as_bytes()[..15], &before[..]);
    }

    #[test]
    fn test_decrypt_opens_sealed_frame() {
        let key = XteaKey::new([9, 8, 7, 6]);
        let mut out = OutgoingMessage::new();
        out.add::<u8>(0x1D);
        out.add("ping");

        let mut buffer = OutgoingBuffer::new();
        buffer.append(&out.take());
        let frame = buffer.seal_encrypted(&key, ChecksumMode::Adler, 0);

        let mut msg = IncomingMessage::from_frame(&frame);
        assert_eq!(msg.header_len() as usize + HEADER_LEN, frame.len());
        assert_ne!(msg.get::<u32>(), 0);
        assert!(msg.decrypt(&key));
        assert_eq!(msg.get::<u8>(), 0x1D);
        assert_eq!(msg.get::<String>(), "ping");
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_decrypt_rejects_oversized_inner_length() {
        let key = XteaKey::new([5, 5, 5, 5]);
        let mut plain = vec![0u8; 8];
        plain[..2].copy_from_slice(&200u16.to_le_bytes());
        xtea::encrypt(&mut plain, &key).unwrap();

        let mut body = vec![1, 0, 0, 0];
        body.extend_from_slice(&plain);
        let mut msg = frame_with_body(&body);
        msg.get::<u32>();
        assert!(!msg.decrypt(&key));
    }
}
