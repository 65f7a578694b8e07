use clap::Parser;
use client::{GameClient, LoginParams, ServerMessage};
use log::{info, warn};
use shared::client_opcode;
use shared::rsa::RsaPublicKey;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:7172")]
    server: String,

    /// Server public key (PEM) used to seal the login block
    #[arg(short = 'k', long)]
    key: PathBuf,

    /// Game world named in the greeting
    #[arg(short = 'w', long, default_value = "World")]
    world: String,

    /// Session token issued by the account service
    #[arg(short = 't', long)]
    token: String,

    /// Character to log in with
    #[arg(short = 'c', long)]
    character: String,

    /// Protocol version to announce
    #[arg(long, default_value = "1310")]
    protocol: u16,

    /// Number of pings to send once in the world
    #[arg(short = 'n', long, default_value = "5")]
    pings: u32,

    /// Delay between pings in milliseconds
    #[arg(short = 'i', long, default_value = "1000")]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let rsa = RsaPublicKey::from_pem(&tokio::fs::read_to_string(&args.key).await?)?;

    info!("Connecting to: {}", args.server);
    let mut client = GameClient::connect(&args.server, rsa).await?;

    let mut params = LoginParams::new(args.token.into_bytes(), args.character.clone());
    params.version = args.protocol;

    for message in client.handshake(&args.world, &params).await? {
        match message {
            ServerMessage::EnterWorld => info!("{} entered the world", args.character),
            ServerMessage::LoginError(reason) => {
                warn!("Login refused: {}", reason);
                return Ok(());
            }
            ServerMessage::WaitingList { message, retry_seconds } => {
                warn!("{} (retry in {}s)", message, retry_seconds);
                return Ok(());
            }
            other => info!("Server sent {:?}", other),
        }
    }

    for _ in 0..args.pings {
        let sent = Instant::now();
        client.send(client_opcode::PING, &[]).await?;
        match timeout(Duration::from_secs(5), client.read_until(|m| *m == ServerMessage::PingBack)).await {
            Ok(Ok(_)) => info!("Ping: {} ms", sent.elapsed().as_millis()),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => warn!("Ping timed out"),
        }
        tokio::time::sleep(Duration::from_millis(args.interval)).await;
    }

    client.send(client_opcode::LOGOUT, &[]).await?;
    info!("Logged out");

    Ok(())
}
