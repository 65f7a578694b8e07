//! XTEA block cipher used for steady-state frames.
//!
//! The cipher runs in place over 8-byte blocks of little-endian word pairs,
//! 32 cycles, with the round keys expanded once per connection.

use thiserror::Error;

pub const BLOCK_LEN: usize = 8;

const DELTA: u32 = 0x9E37_79B9;
const ROUND_KEYS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cipher input of {0} bytes is not a multiple of {BLOCK_LEN}")]
pub struct Misaligned(pub usize);

/// Expanded XTEA key.
#[derive(Clone, PartialEq, Eq)]
pub struct XteaKey {
    words: [u32; 4],
    round_keys: [u32; ROUND_KEYS],
}

impl XteaKey {
    pub fn new(words: [u32; 4]) -> Self {
        let mut round_keys = [0u32; ROUND_KEYS];
        let mut sum: u32 = 0;
        for pair in round_keys.chunks_exact_mut(2) {
            pair[0] = sum.wrapping_add(words[(sum & 3) as usize]);
            sum = sum.wrapping_add(DELTA);
            pair[1] = sum.wrapping_add(words[((sum >> 11) & 3) as usize]);
        }
        Self { words, round_keys }
    }

    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    /// Encrypts one block given as two words.
    pub fn encrypt_block(&self, block: [u32; 2]) -> [u32; 2] {
        let [mut v0, mut v1] = block;
        for pair in self.round_keys.chunks_exact(2) {
            v0 = v0.wrapping_add(mix(v1) ^ pair[0]);
            v1 = v1.wrapping_add(mix(v0) ^ pair[1]);
        }
        [v0, v1]
    }

    /// Decrypts one block given as two words.
    pub fn decrypt_block(&self, block: [u32; 2]) -> [u32; 2] {
        let [mut v0, mut v1] = block;
        for pair in self.round_keys.chunks_exact(2).rev() {
            v1 = v1.wrapping_sub(mix(v0) ^ pair[1]);
            v0 = v0.wrapping_sub(mix(v1) ^ pair[0]);
        }
        [v0, v1]
    }
}

// Key material must never end up in logs.
impl std::fmt::Debug for XteaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("XteaKey(..)")
    }
}

#[inline]
fn mix(v: u32) -> u32 {
    ((v << 4) ^ (v >> 5)).wrapping_add(v)
}

/// Encrypts `buf` in place. `buf.len()` must be a multiple of 8.
pub fn encrypt(buf: &mut [u8], key: &XteaKey) -> Result<(), Misaligned> {
    transform(buf, |block| key.encrypt_block(block))
}

/// Decrypts `buf` in place. `buf.len()` must be a multiple of 8.
pub fn decrypt(buf: &mut [u8], key: &XteaKey) -> Result<(), Misaligned> {
    transform(buf, |block| key.decrypt_block(block))
}

fn transform(buf: &mut [u8], mut op: impl FnMut([u32; 2]) -> [u32; 2]) -> Result<(), Misaligned> {
    if buf.len() % BLOCK_LEN != 0 {
        return Err(Misaligned(buf.len()));
    }

    for chunk in buf.chunks_exact_mut(BLOCK_LEN) {
        let v0 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let v1 = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let [v0, v1] = op([v0, v1]);
        chunk[..4].copy_from_slice(&v0.to_le_bytes());
        chunk[4..].copy_from_slice(&v1.to_le_bytes());
    }

    Ok(())
}

/// Number of zero bytes needed to bring `len` up to a multiple of 8.
pub fn padding_for(len: usize) -> usize {
    (BLOCK_LEN - len % BLOCK_LEN) % BLOCK_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_reference_vector() {
        let key = XteaKey::new([0x0001_0203, 0x0405_0607, 0x0809_0A0B, 0x0C0D_0E0F]);
        let cipher = key.encrypt_block([0x4142_4344, 0x4546_4748]);
        assert_eq!(cipher, [0x497D_F3D0, 0x7261_2CB5]);
        assert_eq!(key.decrypt_block(cipher), [0x4142_4344, 0x4546_4748]);
    }

    #[test]
    fn test_misaligned_input_is_refused() {
        let key = XteaKey::new([1, 2, 3, 4]);
        let mut buf = vec![0u8; 13];
        assert_eq!(decrypt(&mut buf, &key), Err(Misaligned(13)));
        assert_eq!(encrypt(&mut buf, &key), Err(Misaligned(13)));
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_padded_roundtrip_restores_bytes_and_zero_padding() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for len in [1usize, 7, 8, 9, 100, 1021] {
            let key = XteaKey::new(rng.gen());
            let original: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

            let mut buf = original.clone();
            buf.resize(len + padding_for(len), 0);
            encrypt(&mut buf, &key).unwrap();
            decrypt(&mut buf, &key).unwrap();
            assert_eq!(&buf[..len], &original[..]);
            assert!(buf[len..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_padding_for() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 7);
        assert_eq!(padding_for(8), 0);
        assert_eq!(padding_for(15), 1);
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = XteaKey::new([0xDEAD_BEEF, 0, 0, 0]);
        assert_eq!(format!("{:?}", key), "XteaKey(..)");
    }
}
