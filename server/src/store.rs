//! Collaborators the connection core consumes: account lookup and the game world.

use async_trait::async_trait;
use serde::Deserialize;
use shared::Position;
use std::net::IpAddr;

/// Result of resolving a session token and character name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub account_id: u32,
    /// Address the web session was created from.
    pub authorized_ip: IpAddr,
    pub character_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanInfo {
    /// Unix time the ban ends; zero or negative means permanent.
    pub expires_at: i64,
    pub banned_by: String,
    pub reason: String,
}

impl BanInfo {
    pub fn is_permanent(&self) -> bool {
        self.expires_at <= 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    #[default]
    Normal,
    Tutor,
    SeniorTutor,
    Gamemaster,
    CommunityManager,
    God,
}

/// Everything the attach pipeline needs to know about a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterProfile {
    pub id: u32,
    pub name: String,
    pub account_id: u32,
    pub account_type: AccountType,
    /// Bypasses the closing/closed world gates and the waiting list.
    pub can_always_login: bool,
    pub cannot_be_banned: bool,
    pub login_position: Position,
    pub temple_position: Position,
}

impl CharacterProfile {
    pub fn is_gamemaster(&self) -> bool {
        self.account_type >= AccountType::Gamemaster
    }
}

/// Persistent account, session and ban data.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Looks up a live web session by its decoded token and a character of that account.
    async fn resolve_session(&self, token: &[u8], character_name: &str) -> Option<SessionRecord>;

    async fn ip_ban(&self, ip: IpAddr) -> Option<BanInfo>;

    async fn account_ban(&self, account_id: u32) -> Option<BanInfo>;

    async fn is_namelocked(&self, character_id: u32) -> bool;

    async fn load_character(&self, character_id: u32) -> Option<CharacterProfile>;
}

/// The game simulation, driven only from the game dispatcher.
pub trait GameWorld: Send {
    /// Puts the character on the map. `forced` ignores blocking creatures and items.
    fn place_character(&mut self, character: &CharacterProfile, position: Position, forced: bool) -> bool;

    fn remove_character(&mut self, character_id: u32);
}
