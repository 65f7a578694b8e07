//! Server messages understood by the protocol client.

use shared::{server_opcode, IncomingMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Challenge { timestamp: u32, random_number: u8 },
    LoginError(String),
    WaitingList { message: String, retry_seconds: u8 },
    ExtendedOpcode { opcode: u8, buffer: String },
    EnterWorld,
    Ping,
    PingBack,
    /// An opcode this client cannot size; the rest of the frame is skipped.
    Unknown(u8),
}

/// Decodes every message left in `msg`.
pub fn parse_messages(msg: &mut IncomingMessage) -> Vec<ServerMessage> {
    let mut messages = Vec::new();

    while msg.remaining() > 0 {
        let opcode = msg.get::<u8>();
        let message = match opcode {
            server_opcode::CHALLENGE => ServerMessage::Challenge {
                timestamp: msg.get(),
                random_number: msg.get(),
            },
            server_opcode::LOGIN_ERROR => ServerMessage::LoginError(msg.get()),
            server_opcode::LOGIN_WAIT_LIST => ServerMessage::WaitingList {
                message: msg.get(),
                retry_seconds: msg.get(),
            },
            server_opcode::EXTENDED_OPCODE => ServerMessage::ExtendedOpcode {
                opcode: msg.get(),
                buffer: msg.get(),
            },
            server_opcode::ENTER_WORLD => ServerMessage::EnterWorld,
            server_opcode::PING => ServerMessage::Ping,
            server_opcode::PING_BACK => ServerMessage::PingBack,
            other => {
                messages.push(ServerMessage::Unknown(other));
                break;
            }
        };
        messages.push(message);
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(bytes: &[u8]) -> IncomingMessage {
        let mut frame = vec![0u8; 6];
        frame.extend_from_slice(bytes);
        let mut msg = IncomingMessage::from_frame(&frame);
        msg.seek_to(6);
        msg
    }

    #[test]
    fn test_parse_several_messages() {
        let mut msg = payload(&[0x1F, 1, 0, 0, 0, 9, 0x0F, 0x1E]);
        assert_eq!(
            parse_messages(&mut msg),
            vec![
                ServerMessage::Challenge {
                    timestamp: 1,
                    random_number: 9
                },
                ServerMessage::EnterWorld,
                ServerMessage::PingBack,
            ]
        );
    }

    #[test]
    fn test_unknown_opcode_stops_parsing() {
        let mut msg = payload(&[0x1D, 0xAA, 0x1E]);
        assert_eq!(
            parse_messages(&mut msg),
            vec![ServerMessage::Ping, ServerMessage::Unknown(0xAA)]
        );
    }

    #[test]
    fn test_login_error_text() {
        let mut msg = payload(&[0x14, 2, 0, b'N', b'o']);
        assert_eq!(parse_messages(&mut msg), vec![ServerMessage::LoginError("No".into())]);
    }
}
