//! Protocol primitives shared by the game server and the protocol client.
//!
//! Nothing in this crate performs I/O. It provides:
//! - [`IncomingMessage`]: a fixed-capacity inbound cursor with typed reads that
//!   degrade to zero/empty values instead of failing
//! - [`OutgoingMessage`] and [`OutgoingBuffer`]: message encoding and the
//!   frame accumulator with its reserved transport prefix
//! - [`latin1`]: the Latin-1 ⇄ UTF-8 string rule used by every string field
//! - [`xtea`], [`rsa`] and [`checksum`]: the cryptographic pieces of the
//!   handshake and of steady-state framing

pub mod checksum;
pub mod incoming;
pub mod latin1;
pub mod outgoing;
pub mod rsa;
pub mod xtea;

pub use checksum::ChecksumMode;
pub use incoming::IncomingMessage;
pub use outgoing::{OutgoingBuffer, OutgoingMessage};

/// Size of the little-endian `u16` length header in front of every frame.
pub const HEADER_LEN: usize = 2;

/// Size of the checksum slot that follows the header.
pub const CHECKSUM_LEN: usize = 4;

/// Largest body (bytes after the header) accepted in steady state.
pub const MAX_BODY_LEN: usize = 24 * 1024;

/// Largest body accepted for the login request.
pub const MAX_LOGIN_BODY_LEN: usize = 1024;

/// Maximum number of bytes taken by the greeting read.
pub const GREETING_READ_LEN: usize = 256;

/// Cap on the payload accumulated in one outgoing frame.
pub const MAX_OUTGOING_PAYLOAD: usize = 24 * 1024;

/// Bytes reserved in front of every outgoing payload:
/// `[len:u16][checksum:u32][inner_len:u16]`.
pub const OUTGOING_PREFIX_LEN: usize = 8;

/// Identifier of the login request.
pub const LOGIN_REQUEST_ID: u8 = 0x01;

/// Opcodes sent by the client.
pub mod client_opcode {
    pub const DISCONNECT: u8 = 0x0F;
    pub const LOGOUT: u8 = 0x14;
    pub const PING: u8 = 0x1D;
    pub const PING_BACK: u8 = 0x1E;
}

/// Opcodes sent by the server.
pub mod server_opcode {
    pub const ENTER_WORLD: u8 = 0x0F;
    pub const LOGIN_ERROR: u8 = 0x14;
    pub const LOGIN_WAIT_LIST: u8 = 0x16;
    pub const PING: u8 = 0x1D;
    pub const PING_BACK: u8 = 0x1E;
    pub const CHALLENGE: u8 = 0x1F;
    pub const EXTENDED_OPCODE: u8 = 0x32;
}

/// Operating system reported by the client in the login request.
pub mod client_os {
    pub const LINUX: u16 = 0x01;
    pub const WINDOWS: u16 = 0x02;
    pub const FLASH: u16 = 0x03;
    pub const QT_LINUX: u16 = 0x04;
    pub const QT_WINDOWS: u16 = 0x05;
    pub const QT_MAC: u16 = 0x06;
    pub const QT_LINUX2: u16 = 0x07;
    pub const OTCLIENT_LINUX: u16 = 0x0A;
    pub const OTCLIENT_WINDOWS: u16 = 0x0B;
    pub const OTCLIENT_MAC: u16 = 0x0C;
}

/// A map coordinate as it travels on the wire: `x:u16 | y:u16 | z:u8`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

impl Position {
    pub fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
