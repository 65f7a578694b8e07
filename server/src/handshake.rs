//! Decoding of the greeting and the login request.
//!
//! These functions only parse; the connection decides what each outcome
//! does to its state.

use crate::error::LoginRejection;
use crate::utils::unix_timestamp;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use shared::rsa::{RsaError, RsaPrivateKey};
use shared::xtea::XteaKey;
use shared::{client_os, IncomingMessage, LOGIN_REQUEST_ID};
use thiserror::Error;

/// Fatal protocol errors before steady state.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("empty greeting")]
    EmptyGreeting,
    #[error("login frame length {0} out of bounds")]
    LoginLength(u16),
    #[error("frame length {0} out of bounds")]
    FrameLength(u16),
    #[error("login checksum is {0:#010x}, expected zero")]
    LoginChecksum(u32),
    #[error("unexpected request {0:#04x}")]
    UnexpectedRequest(u8),
    #[error("login request too short for the RSA block")]
    TruncatedRsaBlock,
    #[error("RSA decryption failed: {0}")]
    Rsa(#[from] RsaError),
    #[error("RSA block does not start with zero")]
    RsaPadding,
    #[error("challenge mismatch")]
    ChallengeMismatch,
}

/// The `(timestamp, random number)` pair a client must echo back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    pub timestamp: u32,
    pub random_number: u8,
}

impl Challenge {
    pub fn generate() -> Self {
        Self {
            timestamp: unix_timestamp() as u32,
            random_number: rand::random(),
        }
    }
}

/// Parses the greeting from `n` bytes read into the body region.
///
/// The greeting has no frame header; its first two bytes are the name's own
/// length prefix.
pub fn read_greeting(msg: &mut IncomingMessage, n: usize) -> Result<String, ProtocolViolation> {
    msg.set_header_len(n as u16);
    let world_name = msg.get::<String>();
    if world_name.is_empty() {
        return Err(ProtocolViolation::EmptyGreeting);
    }
    Ok(world_name)
}

/// Login fields up to and including the symmetric key.
#[derive(Debug)]
pub struct LoginPrelude {
    pub os: u16,
    pub version: u16,
    pub key: XteaKey,
}

pub fn read_prelude(msg: &mut IncomingMessage, rsa: &RsaPrivateKey) -> Result<LoginPrelude, ProtocolViolation> {
    let checksum = msg.get::<u32>();
    if checksum != 0 {
        return Err(ProtocolViolation::LoginChecksum(checksum));
    }

    let id = msg.get::<u8>();
    if id != LOGIN_REQUEST_ID {
        return Err(ProtocolViolation::UnexpectedRequest(id));
    }

    let os = msg.get::<u16>();
    let version = msg.get::<u16>();
    msg.advance(4);

    // Clients that send their version string leave more than the RSA block
    // and the revision bytes.
    let block_len = rsa.block_len();
    if msg.remaining() > block_len + 4 {
        let _ = msg.get::<String>();
    }

    // dat revision (u16) and preview state (u8)
    msg.advance(3);

    if msg.remaining() < block_len {
        return Err(ProtocolViolation::TruncatedRsaBlock);
    }
    rsa.decrypt_block(&mut msg.remaining_slice_mut()[..block_len])?;
    if msg.get::<u8>() != 0 {
        return Err(ProtocolViolation::RsaPadding);
    }

    let key = XteaKey::new([msg.get(), msg.get(), msg.get(), msg.get()]);
    Ok(LoginPrelude { os, version, key })
}

/// Login fields after the symmetric key.
#[derive(Debug)]
pub struct Credentials {
    pub session_token: Vec<u8>,
    pub character_name: String,
    pub challenge: Challenge,
}

pub fn read_credentials(msg: &mut IncomingMessage, os: u16) -> Result<Credentials, LoginRejection> {
    // gamemaster flag
    msg.advance(1);

    let session_token = BASE64
        .decode(msg.get::<String>())
        .ok()
        .filter(|token| !token.is_empty())
        .ok_or(LoginRejection::MalformedSessionKey)?;

    if os == client_os::QT_LINUX {
        // OS name and version
        let _ = msg.get::<String>();
        let _ = msg.get::<String>();
    }

    let character_name = msg.get::<String>();
    let timestamp = msg.get::<u32>();
    let random_number = msg.get::<u8>();

    Ok(Credentials {
        session_token,
        character_name,
        challenge: Challenge {
            timestamp,
            random_number,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::rsa::test_keys;
    use shared::OutgoingMessage;

    struct LoginFields<'a> {
        os: u16,
        version_string: Option<&'a str>,
        token: &'a str,
        name: &'a str,
        challenge: Challenge,
        /// First plaintext byte of the RSA block; valid logins use zero.
        rsa_lead: u8,
    }

    fn login_frame(fields: &LoginFields<'_>) -> IncomingMessage {
        let mut block = OutgoingMessage::new();
        block.add(fields.rsa_lead);
        for word in [1u32, 2, 3, 4] {
            block.add(word);
        }
        block.add(0u8).add(BASE64.encode(fields.token));
        if fields.os == client_os::QT_LINUX {
            block.add("Linux").add("6.1");
        }
        block
            .add(fields.name)
            .add(fields.challenge.timestamp)
            .add(fields.challenge.random_number);
        let mut sealed = block.as_bytes().to_vec();
        sealed.resize(128, 0);
        test_keys::public_key().encrypt_block(&mut sealed).unwrap();

        let mut body = OutgoingMessage::new();
        body.add(0u32).add(LOGIN_REQUEST_ID).add(fields.os).add(1310u16).add(0u32);
        if let Some(version) = fields.version_string {
            body.add(version);
        }
        body.add(0u16).add(0u8).add_bytes(&sealed);

        let mut frame = (body.len() as u16).to_le_bytes().to_vec();
        frame.extend_from_slice(body.as_bytes());
        let mut msg = IncomingMessage::from_frame(&frame);
        msg.truncate(body.len());
        msg
    }

    fn fields(os: u16) -> LoginFields<'static> {
        LoginFields {
            os,
            version_string: None,
            token: "secret",
            name: "Knight",
            challenge: Challenge {
                timestamp: 1_700_000_000,
                random_number: 42,
            },
            rsa_lead: 0,
        }
    }

    #[test]
    fn test_greeting() {
        let mut msg = IncomingMessage::new();
        msg.body_region_mut()[..6].copy_from_slice(&[4, 0, b'W', b'o', b'r', b'd']);
        assert_eq!(read_greeting(&mut msg, 6).unwrap(), "Word");

        // Length prefix larger than what arrived.
        let mut short = IncomingMessage::new();
        short.body_region_mut()[..4].copy_from_slice(&[9, 0, b'W', b'o']);
        assert!(matches!(read_greeting(&mut short, 4), Err(ProtocolViolation::EmptyGreeting)));

        let mut empty = IncomingMessage::new();
        assert!(matches!(read_greeting(&mut empty, 2), Err(ProtocolViolation::EmptyGreeting)));
    }

    #[test]
    fn test_full_login_decode() {
        let rsa = test_keys::private_key();
        let mut msg = login_frame(&fields(client_os::WINDOWS));

        let prelude = read_prelude(&mut msg, &rsa).unwrap();
        assert_eq!(prelude.os, client_os::WINDOWS);
        assert_eq!(prelude.version, 1310);
        assert_eq!(prelude.key.words(), [1, 2, 3, 4]);

        let credentials = read_credentials(&mut msg, prelude.os).unwrap();
        assert_eq!(credentials.session_token, b"secret");
        assert_eq!(credentials.character_name, "Knight");
        assert_eq!(credentials.challenge, fields(0).challenge);
    }

    #[test]
    fn test_version_string_and_qt_linux_strings_are_skipped() {
        let rsa = test_keys::private_key();
        let mut login = fields(client_os::QT_LINUX);
        login.version_string = Some("13.10.14020");
        let mut msg = login_frame(&login);

        let prelude = read_prelude(&mut msg, &rsa).unwrap();
        assert_eq!(prelude.key.words(), [1, 2, 3, 4]);
        let credentials = read_credentials(&mut msg, prelude.os).unwrap();
        assert_eq!(credentials.character_name, "Knight");
        assert_eq!(credentials.challenge.random_number, 42);
    }

    #[test]
    fn test_nonzero_checksum_is_fatal() {
        let rsa = test_keys::private_key();
        let mut msg = login_frame(&fields(client_os::WINDOWS));
        msg.as_bytes_mut()[2] = 1;
        assert!(matches!(
            read_prelude(&mut msg, &rsa),
            Err(ProtocolViolation::LoginChecksum(1))
        ));
    }

    #[test]
    fn test_wrong_request_id_is_fatal() {
        let rsa = test_keys::private_key();
        let mut msg = login_frame(&fields(client_os::WINDOWS));
        msg.as_bytes_mut()[6] = 0x0A;
        assert!(matches!(
            read_prelude(&mut msg, &rsa),
            Err(ProtocolViolation::UnexpectedRequest(0x0A))
        ));
    }

    #[test]
    fn test_rsa_block_must_open_with_zero() {
        let rsa = test_keys::private_key();
        let mut login = fields(client_os::WINDOWS);
        login.rsa_lead = 0x01;
        let mut msg = login_frame(&login);
        assert!(matches!(read_prelude(&mut msg, &rsa), Err(ProtocolViolation::RsaPadding)));
    }

    #[test]
    fn test_truncated_rsa_block() {
        let rsa = test_keys::private_key();
        let mut msg = login_frame(&fields(client_os::WINDOWS));
        let len = msg.len();
        msg.truncate(len - 2 - 10);
        assert!(matches!(
            read_prelude(&mut msg, &rsa),
            Err(ProtocolViolation::TruncatedRsaBlock)
        ));
    }

    #[test]
    fn test_malformed_session_key() {
        let rsa = test_keys::private_key();
        let mut login = fields(client_os::WINDOWS);
        login.token = "";
        let mut msg = login_frame(&login);
        let prelude = read_prelude(&mut msg, &rsa).unwrap();
        assert_eq!(
            read_credentials(&mut msg, prelude.os).unwrap_err(),
            LoginRejection::MalformedSessionKey
        );
    }
}
