//! Server messages emitted by the connection core itself.
//!
//! Each function returns one serialized message without transport framing;
//! callers hand it to [`Connection::enqueue`](crate::connection::Connection::enqueue).

use bytes::Bytes;
use shared::{server_opcode, OutgoingMessage};

pub fn challenge(timestamp: u32, random_number: u8) -> Bytes {
    let mut msg = OutgoingMessage::new();
    msg.add(server_opcode::CHALLENGE).add(timestamp).add(random_number);
    msg.take()
}

pub fn login_error(text: &str) -> Bytes {
    let mut msg = OutgoingMessage::new();
    msg.add(server_opcode::LOGIN_ERROR).add(text);
    msg.take()
}

/// Waiting list notice with the number of seconds before the client retries.
pub fn waiting_list(slot: usize, retry_seconds: u8) -> Bytes {
    let text = format!("Too many players online.\nYou are at place {} on the waiting list.", slot);
    let mut msg = OutgoingMessage::new();
    msg.add(server_opcode::LOGIN_WAIT_LIST).add(text).add(retry_seconds);
    msg.take()
}

/// Tells extended clients that the extended opcode is available.
pub fn extended_opcode_announcement() -> Bytes {
    let mut msg = OutgoingMessage::new();
    msg.add(server_opcode::EXTENDED_OPCODE).add(0u8).add(0u16);
    msg.take()
}

pub fn enter_world() -> Bytes {
    Bytes::from_static(&[server_opcode::ENTER_WORLD])
}

pub fn ping() -> Bytes {
    Bytes::from_static(&[server_opcode::PING])
}

pub fn ping_back() -> Bytes {
    Bytes::from_static(&[server_opcode::PING_BACK])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_layout() {
        let bytes = challenge(0x0102_0304, 0xAB);
        assert_eq!(&bytes[..], &[0x1F, 0x04, 0x03, 0x02, 0x01, 0xAB]);
    }

    #[test]
    fn test_login_error_layout() {
        let bytes = login_error("No");
        assert_eq!(&bytes[..], &[0x14, 0x02, 0x00, b'N', b'o']);
    }

    #[test]
    fn test_waiting_list_layout() {
        let bytes = waiting_list(3, 5);
        assert_eq!(bytes[0], 0x16);
        let len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        let text = std::str::from_utf8(&bytes[3..3 + len]).unwrap();
        assert_eq!(text, "Too many players online.\nYou are at place 3 on the waiting list.");
        assert_eq!(bytes[3 + len], 5);
        assert_eq!(bytes.len(), 4 + len);
    }

    #[test]
    fn test_extended_opcode_announcement() {
        assert_eq!(&extended_opcode_announcement()[..], &[0x32, 0x00, 0x00, 0x00]);
    }
}
