//! Error types of the game server.

use crate::store::BanInfo;
use crate::utils::format_date_short;
use shared::rsa::RsaError;
use thiserror::Error;

/// Failures while configuring or starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("failed to read RSA key {path}: {source}")]
    KeyRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid RSA key: {0}")]
    Rsa(#[from] RsaError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A login refused for a reason the client is told about.
///
/// `Display` renders the exact text sent in the login-error frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginRejection {
    #[error("Only clients with protocol {0} allowed!")]
    UnsupportedVersion(String),
    #[error("Malformed session key.")]
    MalformedSessionKey,
    #[error("Gameworld is starting up. Please wait.")]
    StartingUp,
    #[error("Gameworld is under maintenance. Please re-connect in a while.")]
    Maintenance,
    #[error("Your IP has been banned until {until} by {banned_by}.\n\nReason specified:\n{reason}")]
    IpBanned {
        until: String,
        banned_by: String,
        reason: String,
    },
    #[error("Account name or password is not correct.")]
    InvalidCredentials,
    #[error("Your game session is already locked to a different IP. Please log in again.")]
    SessionIpMismatch,
    #[error("Your character could not be loaded.")]
    CharacterNotLoaded,
    #[error("Your character has been namelocked.")]
    Namelocked,
    #[error("The game is just going down.\nPlease try again later.")]
    GoingDown,
    #[error("Server is currently closed.\nPlease try again later.")]
    ServerClosed,
    #[error("You may only login with one character\nof your account at the same time.")]
    OneCharacterPerAccount,
    #[error("Your account has been banned until {until} by {banned_by}.\n\nReason specified:\n{reason}")]
    AccountBanned {
        until: String,
        banned_by: String,
        reason: String,
    },
    #[error("Your account has been permanently banned by {banned_by}.\n\nReason specified:\n{reason}")]
    AccountBannedPermanently { banned_by: String, reason: String },
    #[error("Temple position is wrong. Contact the administrator.")]
    TemplePositionWrong,
    #[error("You are already logged in.")]
    AlreadyLoggedIn,
}

impl LoginRejection {
    pub fn ip_banned(ban: &BanInfo) -> Self {
        LoginRejection::IpBanned {
            until: format_date_short(ban.expires_at),
            banned_by: ban.banned_by.clone(),
            reason: ban.reason.clone(),
        }
    }

    /// Temporary or permanent account ban, depending on the expiry.
    pub fn account_banned(ban: &BanInfo) -> Self {
        if ban.is_permanent() {
            LoginRejection::AccountBannedPermanently {
                banned_by: ban.banned_by.clone(),
                reason: ban.reason.clone(),
            }
        } else {
            LoginRejection::AccountBanned {
                until: format_date_short(ban.expires_at),
                banned_by: ban.banned_by.clone(),
                reason: ban.reason.clone(),
            }
        }
    }
}
