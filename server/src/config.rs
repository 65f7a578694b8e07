//! Server configuration loaded from TOML.

use crate::error::ServerError;
use crate::store::AccountType;
use serde::Deserialize;
use shared::rsa::RsaPrivateKey;
use shared::{client_os, ChecksumMode, Position};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do with a steady-state frame whose declared length is out of bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Stop reading; the read watchdog or the peer ends the connection.
    #[default]
    Drop,
    /// Close the connection immediately.
    Close,
}

/// Client OS/version thresholds that select per-connection protocol features.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChecksumPolicy {
    pub sequence_min_version: u16,
    pub sequence_os_min: u16,
    pub sequence_os_max: u16,
    pub extended_os_min: u16,
}

impl Default for ChecksumPolicy {
    fn default() -> Self {
        Self {
            sequence_min_version: 1111,
            sequence_os_min: client_os::QT_LINUX,
            sequence_os_max: client_os::OTCLIENT_MAC,
            extended_os_min: client_os::OTCLIENT_LINUX,
        }
    }
}

impl ChecksumPolicy {
    pub fn mode_for(&self, os: u16, version: u16) -> ChecksumMode {
        if version >= self.sequence_min_version && (self.sequence_os_min..=self.sequence_os_max).contains(&os) {
            ChecksumMode::Sequence
        } else {
            ChecksumMode::Adler
        }
    }

    /// Whether the client understands the extended opcode.
    pub fn is_extended_client(&self, os: u16) -> bool {
        os >= self.extended_os_min
    }
}

/// The login RSA key: a PEM file, or the modulus and private exponent in
/// decimal. The decimal pair wins when both are given.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RsaConfig {
    pub key_file: Option<PathBuf>,
    pub modulus: Option<String>,
    pub private_exponent: Option<String>,
}

impl Default for RsaConfig {
    fn default() -> Self {
        Self {
            key_file: Some(PathBuf::from("key.pem")),
            modulus: None,
            private_exponent: None,
        }
    }
}

/// One character of an [`AccountConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct CharacterConfig {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub login_position: Option<(u16, u16, u8)>,
    #[serde(default = "default_temple")]
    pub temple_position: (u16, u16, u8),
    #[serde(default)]
    pub can_always_login: bool,
    #[serde(default)]
    pub cannot_be_banned: bool,
}

fn default_temple() -> (u16, u16, u8) {
    (100, 100, 7)
}

impl CharacterConfig {
    pub fn login_position(&self) -> Position {
        let (x, y, z) = self.login_position.unwrap_or(self.temple_position);
        Position::new(x, y, z)
    }

    pub fn temple_position(&self) -> Position {
        let (x, y, z) = self.temple_position;
        Position::new(x, y, z)
    }
}

/// Account entry for the bundled in-memory account store.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: u32,
    /// Session token as the client decodes it from base64.
    pub session_token: String,
    #[serde(default = "default_authorized_ip")]
    pub authorized_ip: IpAddr,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default)]
    pub characters: Vec<CharacterConfig>,
}

fn default_authorized_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub client_version_min: u16,
    pub client_version_max: u16,
    pub replace_kick_on_login: bool,
    pub allow_clones: bool,
    pub one_player_per_account: bool,
    /// Online player cap before the waiting list kicks in; 0 disables it.
    pub max_players: usize,
    pub kick_reattach_delay_ms: u64,
    pub flush_interval_ms: u64,
    pub login_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub oversize_frame_policy: OversizePolicy,
    pub checksum: ChecksumPolicy,
    pub rsa: RsaConfig,
    pub accounts: Vec<AccountConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7172,
            client_version_min: 1310,
            client_version_max: 1311,
            replace_kick_on_login: true,
            allow_clones: false,
            one_player_per_account: true,
            max_players: 0,
            kick_reattach_delay_ms: 1000,
            flush_interval_ms: 10,
            login_timeout_secs: 5,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            oversize_frame_policy: OversizePolicy::Drop,
            checksum: ChecksumPolicy::default(),
            rsa: RsaConfig::default(),
            accounts: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ServerError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.client_version_min > self.client_version_max {
            return Err(ServerError::InvalidConfig(format!(
                "client_version_min {} is above client_version_max {}",
                self.client_version_min, self.client_version_max
            )));
        }
        if self.flush_interval_ms == 0 {
            return Err(ServerError::InvalidConfig("flush_interval_ms must be positive".into()));
        }
        if self.rsa.modulus.is_some() != self.rsa.private_exponent.is_some() {
            return Err(ServerError::InvalidConfig(
                "[rsa] needs both modulus and private_exponent".into(),
            ));
        }
        if self.rsa.modulus.is_none() && self.rsa.key_file.is_none() {
            return Err(ServerError::InvalidConfig("no RSA key configured".into()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Supported protocol versions as shown to clients, e.g. `13.10-13.11`.
    pub fn version_label(&self) -> String {
        let fmt = |v: u16| format!("{}.{:02}", v / 100, v % 100);
        if self.client_version_min == self.client_version_max {
            fmt(self.client_version_min)
        } else {
            format!("{}-{}", fmt(self.client_version_min), fmt(self.client_version_max))
        }
    }

    pub fn accepts_version(&self, version: u16) -> bool {
        (self.client_version_min..=self.client_version_max).contains(&version)
    }

    /// Builds the login RSA key. There is no fallback: a server without a
    /// key would receive every session key in the clear.
    pub fn rsa_key(&self) -> Result<RsaPrivateKey, ServerError> {
        let rsa = &self.rsa;
        match (&rsa.modulus, &rsa.private_exponent, &rsa.key_file) {
            (Some(modulus), Some(exponent), _) => Ok(RsaPrivateKey::from_decimal(modulus, exponent)?),
            (None, None, Some(path)) => {
                let pem = std::fs::read_to_string(path).map_err(|source| ServerError::KeyRead {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(RsaPrivateKey::from_pem(&pem)?)
            }
            (None, None, None) => Err(ServerError::InvalidConfig("no RSA key configured".into())),
            _ => Err(ServerError::InvalidConfig(
                "[rsa] needs both modulus and private_exponent".into(),
            )),
        }
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn kick_reattach_delay(&self) -> Duration {
        Duration::from_millis(self.kick_reattach_delay_ms)
    }
}
