//! # Game Client Library
//!
//! A headless client for the game server's connection protocol. It performs
//! the same exchange a real game client does and then speaks steady-state
//! frames, which makes it useful for end-to-end tests and as a smoke-test bot
//! against a running server.
//!
//! ## Protocol Overview
//!
//! ### Greeting and Challenge
//! The client opens with a greeting naming the game world. The server answers
//! with an unencrypted challenge frame carrying a timestamp and a random byte
//! that the client must echo back inside its login request.
//!
//! ### Login
//! The login request carries the client OS and protocol version in the clear,
//! followed by one RSA block holding the XTEA key, the base64 session token,
//! the character name and the echoed challenge. Every frame after the login
//! request is XTEA-encrypted in both directions.
//!
//! ### Steady State
//! Frames are `len | checksum | XTEA(inner_len | messages | padding)`. The
//! client computes the checksum in the configured [`shared::ChecksumMode`].
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`GameClient`]: the TCP stream, login sealing and frame encryption.
//!
//! ### Messages Module (`messages`)
//! Decoding of the server messages this client understands.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{GameClient, LoginParams, ServerMessage};
//! use shared::rsa::RsaPublicKey;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::ClientError> {
//!     let rsa = RsaPublicKey::from_pem(&std::fs::read_to_string("public.pem")?)?;
//!     let mut client = GameClient::connect("127.0.0.1:7172", rsa).await?;
//!     let params = LoginParams::new(b"session-token".to_vec(), "Knight");
//!
//!     let reply = client.handshake("World", &params).await?;
//!     if reply.contains(&ServerMessage::EnterWorld) {
//!         client.send(shared::client_opcode::PING, &[]).await?;
//!         client.read_until(|m| *m == ServerMessage::PingBack).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod messages;
pub mod network;

pub use error::ClientError;
pub use messages::ServerMessage;
pub use network::{Challenge, GameClient, LoginParams};
