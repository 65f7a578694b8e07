//! TCP side of the protocol client.

use crate::error::ClientError;
use crate::messages::{parse_messages, ServerMessage};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, trace};
use shared::rsa::RsaPublicKey;
use shared::xtea::XteaKey;
use shared::{
    client_os, ChecksumMode, IncomingMessage, OutgoingBuffer, OutgoingMessage, HEADER_LEN, LOGIN_REQUEST_ID,
    MAX_BODY_LEN, MAX_LOGIN_BODY_LEN,
};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Fields of the login request.
#[derive(Debug, Clone)]
pub struct LoginParams {
    pub os: u16,
    pub version: u16,
    /// Sent by newer clients in front of the revision bytes.
    pub version_string: Option<String>,
    /// Raw session token; encoded to base64 on the wire.
    pub session_token: Vec<u8>,
    pub character_name: String,
    pub key: [u32; 4],
}

impl LoginParams {
    /// A Windows 13.10 login with a random XTEA key.
    pub fn new(session_token: impl Into<Vec<u8>>, character_name: impl Into<String>) -> Self {
        Self {
            os: client_os::WINDOWS,
            version: 1310,
            version_string: None,
            session_token: session_token.into(),
            character_name: character_name.into(),
            key: rand::random(),
        }
    }
}

/// The `(timestamp, random number)` pair received in the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    pub timestamp: u32,
    pub random_number: u8,
}

pub struct GameClient {
    stream: TcpStream,
    rsa: RsaPublicKey,
    key: Option<XteaKey>,
    checksum_mode: ChecksumMode,
    send_sequence: u32,
}

impl GameClient {
    /// Connects to `addr`; the login block is sealed with the server's `rsa` key.
    pub async fn connect(addr: impl ToSocketAddrs, rsa: RsaPublicKey) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        Ok(GameClient {
            stream,
            rsa,
            key: None,
            checksum_mode: ChecksumMode::Adler,
            send_sequence: 0,
        })
    }

    /// Checksum mode for outgoing frames after login.
    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.checksum_mode = mode;
        self
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Sends the greeting naming the game world.
    pub async fn send_greeting(&mut self, world: &str) -> Result<(), ClientError> {
        let mut msg = OutgoingMessage::new();
        msg.add(world);
        self.stream.write_all(msg.as_bytes()).await?;
        Ok(())
    }

    /// Waits for the challenge frame that answers the greeting.
    pub async fn read_challenge(&mut self) -> Result<Challenge, ClientError> {
        for message in self.read_frame().await? {
            if let ServerMessage::Challenge {
                timestamp,
                random_number,
            } = message
            {
                return Ok(Challenge {
                    timestamp,
                    random_number,
                });
            }
        }
        Err(ClientError::Protocol("expected a challenge".into()))
    }

    /// Sends the login request and switches to encrypted frames.
    pub async fn login(&mut self, params: &LoginParams, challenge: Challenge) -> Result<(), ClientError> {
        let frame = self.login_frame(params, challenge)?;
        self.stream.write_all(&frame).await?;
        self.key = Some(XteaKey::new(params.key));
        debug!("Sent login for {}", params.character_name);
        Ok(())
    }

    fn login_frame(&self, params: &LoginParams, challenge: Challenge) -> Result<Vec<u8>, ClientError> {
        let mut block = OutgoingMessage::new();
        block.add(0u8);
        for word in params.key {
            block.add(word);
        }
        block.add(0u8).add(BASE64.encode(&params.session_token));
        if params.os == client_os::QT_LINUX {
            block.add(std::env::consts::OS).add("1.0");
        }
        block
            .add(params.character_name.as_str())
            .add(challenge.timestamp)
            .add(challenge.random_number);

        let block_len = self.rsa.block_len();
        if block.len() > block_len {
            return Err(ClientError::LoginTooLarge(block.len()));
        }
        let mut sealed = block.as_bytes().to_vec();
        sealed.resize(block_len, 0);
        self.rsa.encrypt_block(&mut sealed)?;

        let mut body = OutgoingMessage::new();
        body.add(0u32)
            .add(LOGIN_REQUEST_ID)
            .add(params.os)
            .add(params.version)
            .add(u32::from(params.version));
        if let Some(version) = &params.version_string {
            body.add(version.as_str());
        }
        body.add(0u16).add(0u8).add_bytes(&sealed);

        if body.len() > MAX_LOGIN_BODY_LEN {
            return Err(ClientError::LoginTooLarge(body.len()));
        }

        let mut frame = OutgoingMessage::new();
        frame.add(body.len() as u16).add_bytes(body.as_bytes());
        Ok(frame.as_bytes().to_vec())
    }

    /// Sends one encrypted message.
    pub async fn send(&mut self, opcode: u8, payload: &[u8]) -> Result<(), ClientError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| ClientError::Protocol("no key before login".into()))?;

        let mut buffer = OutgoingBuffer::new();
        if !buffer.append(&[opcode]) || !buffer.append(payload) {
            return Err(ClientError::Protocol(format!("payload of {} bytes too large", payload.len())));
        }
        self.send_sequence = self.send_sequence.wrapping_add(1);
        let frame = buffer.seal_encrypted(key, self.checksum_mode, self.send_sequence);

        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Writes bytes as they are, framing included.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Reads one frame and decodes the messages in it.
    pub async fn read_frame(&mut self) -> Result<Vec<ServerMessage>, ClientError> {
        let mut msg = IncomingMessage::new();
        self.read_exact(msg.header_mut()).await?;
        let len = usize::from(msg.header_len());
        if len == 0 || len > MAX_BODY_LEN {
            return Err(ClientError::Protocol(format!("frame length {} out of bounds", len)));
        }
        msg.truncate(len);
        self.read_exact(msg.body_mut()).await?;

        match &self.key {
            Some(key) => {
                if !msg.decrypt(key) {
                    return Err(ClientError::Protocol("undecryptable frame".into()));
                }
            }
            None => msg.seek_to(HEADER_LEN + 4),
        }

        let messages = parse_messages(&mut msg);
        trace!("Received {:?}", messages);
        Ok(messages)
    }

    /// Reads frames until `pred` matches a message, returning that message.
    pub async fn read_until<F>(&mut self, mut pred: F) -> Result<ServerMessage, ClientError>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            if let Some(found) = self.read_frame().await?.into_iter().find(|m| pred(m)) {
                return Ok(found);
            }
        }
    }

    /// Greeting, challenge and login in one go; returns the first frame after login.
    pub async fn handshake(&mut self, world: &str, params: &LoginParams) -> Result<Vec<ServerMessage>, ClientError> {
        self.send_greeting(world).await?;
        let challenge = self.read_challenge().await?;
        self.login(params, challenge).await?;
        self.read_frame().await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ClientError> {
        match self.stream.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ClientError::Closed),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::rsa::test_keys;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_login_frame_layout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = GameClient::connect(addr, test_keys::public_key()).await.unwrap();

        let mut params = LoginParams::new(b"token".to_vec(), "Knight");
        params.key = [1, 2, 3, 4];
        let challenge = Challenge {
            timestamp: 77,
            random_number: 5,
        };
        let frame = client.login_frame(&params, challenge).unwrap();

        let body_len = u16::from_le_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(frame.len(), body_len + 2);
        assert_eq!(&frame[2..6], &[0, 0, 0, 0]);
        assert_eq!(frame[6], LOGIN_REQUEST_ID);
        assert_eq!(body_len, 4 + 1 + 2 + 2 + 4 + 3 + 128);

        let mut block = frame[frame.len() - 128..].to_vec();
        test_keys::private_key().decrypt_block(&mut block).unwrap();
        assert_eq!(block[0], 0);
        assert_eq!(&block[1..5], &1u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_greeting_is_just_the_prefixed_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = GameClient::connect(listener.local_addr().unwrap(), test_keys::public_key())
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        client.send_greeting("World").await.unwrap();
        drop(client);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"\x05\x00World");
    }

    #[tokio::test]
    async fn test_oversized_login_block_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = GameClient::connect(listener.local_addr().unwrap(), test_keys::public_key())
            .await
            .unwrap();

        let params = LoginParams::new(vec![7u8; 200], "Knight");
        let challenge = Challenge {
            timestamp: 0,
            random_number: 0,
        };
        assert!(matches!(
            client.login_frame(&params, challenge),
            Err(ClientError::LoginTooLarge(_))
        ));
    }
}
