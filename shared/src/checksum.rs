//! Frame checksum modes.

/// How the 4-byte checksum slot of an encrypted frame is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Adler-32 over the encrypted region.
    #[default]
    Adler,
    /// A per-connection counter incremented for every frame.
    Sequence,
}

impl ChecksumMode {
    /// Whether an inbound frame with a zero checksum is malformed in this mode.
    pub fn requires_nonzero(self) -> bool {
        matches!(self, ChecksumMode::Adler)
    }
}

const ADLER_MOD: u32 = 65_521;
// Largest n such that 255n(n+1)/2 + (n+1)(ADLER_MOD-1) fits in u32.
const ADLER_NMAX: usize = 5552;

/// Adler-32 of `data`.
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    for chunk in data.chunks(ADLER_NMAX) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }

    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adler32_known_values() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn test_adler32_long_input_does_not_overflow() {
        let data = vec![0xFFu8; 100_000];
        let sum = adler32(&data);
        assert_ne!(sum, 0);
        assert!(sum & 0xFFFF < ADLER_MOD);
    }

    #[test]
    fn test_modes() {
        assert_eq!(ChecksumMode::default(), ChecksumMode::Adler);
        assert!(ChecksumMode::Adler.requires_nonzero());
        assert!(!ChecksumMode::Sequence.requires_nonzero());
    }
}
