//! # Game Server Library
//!
//! This library provides the connection core of the game server: everything
//! between an accepted TCP socket and the game logic that consumes decoded
//! client messages. It authenticates clients, binds them to characters in the
//! world, and moves framed, encrypted messages in both directions.
//!
//! ## Core Responsibilities
//!
//! ### Handshake and Login
//! Each connection walks through a fixed sequence before it is allowed to
//! speak game opcodes:
//! - Greeting from the client, answered with a challenge
//! - Login request carrying an RSA-sealed XTEA key and a session token
//! - Account resolution, bans and IP pinning through an [`store::AccountStore`]
//! - Player attach on the game task, including the waiting list and the
//!   kick-and-replace path for characters that are already online
//!
//! ### Steady State
//! After login every frame is decrypted, checked and handed to the
//! [`handlers::OpcodeRegistry`]. Malformed frames are dropped rather than
//! fatal; the read watchdog reclaims peers that stop behaving.
//!
//! ### Output
//! Outgoing messages are coalesced into pooled buffers and sealed into frames
//! when full, when explicitly flushed, or on the next tick of the
//! [`flush::FlushScheduler`]. One writer task per connection sends frames in
//! order with at most one write in flight.
//!
//! ## Architecture Design
//!
//! ### Task per Connection Half
//! Every connection runs a reader task (the state machine) and a writer task
//! (the output queue). Shared per-connection state sits behind one
//! short-lived lock that is never held across an await point.
//!
//! ### Single Game Task
//! Sessions, the world and the waiting list are owned by one task fed through
//! the [`dispatcher::Dispatcher`]. Connection tasks never touch game state
//! directly; they send closures and await the result where they need one.
//!
//! ### Non-owning Back-references
//! Sessions refer to connections through weak handles and connections refer
//! to sessions through [`session::SessionHandle`]. Closing a connection
//! detaches it from its session without removing the character from the
//! world.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! TCP listener, server start-up and shutdown.
//!
//! ### Connection Module (`connection`)
//! Reader and writer tasks, output coalescing and the close paths.
//!
//! ### Handshake Module (`handshake`)
//! Decoding of the greeting and the login request.
//!
//! ### Attach Module (`attach`)
//! Session creation, login gates and kick-and-replace on the game task.
//!
//! ### Collaborators (`store`, `memory`)
//! Traits for account data and the game world, with in-memory versions used
//! by the bundled binary and the tests.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::load("server.toml")?;
//!     let handle = Server::new(config)?.start().await?;
//!     println!("listening on {}", handle.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod attach;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod flush;
pub mod handlers;
pub mod handshake;
pub mod lifecycle;
pub mod memory;
pub mod network;
pub mod pool;
pub mod session;
pub mod store;
pub mod utils;
pub mod waitlist;
pub mod writer;
