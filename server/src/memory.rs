//! In-memory collaborators used by the bundled binary and by tests.

use crate::config::AccountConfig;
use crate::store::{AccountStore, BanInfo, CharacterProfile, GameWorld, SessionRecord};
use async_trait::async_trait;
use shared::Position;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Account store backed by the `[[accounts]]` table of the config.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Vec<AccountConfig>,
    ip_bans: RwLock<HashMap<IpAddr, BanInfo>>,
    account_bans: RwLock<HashMap<u32, BanInfo>>,
    namelocks: RwLock<HashSet<u32>>,
    session_lookups: AtomicUsize,
}

impl MemoryAccountStore {
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        Self {
            accounts,
            ..Self::default()
        }
    }

    pub fn ban_ip(&self, ip: IpAddr, ban: BanInfo) {
        if let Ok(mut bans) = self.ip_bans.write() {
            bans.insert(ip, ban);
        }
    }

    pub fn ban_account(&self, account_id: u32, ban: BanInfo) {
        if let Ok(mut bans) = self.account_bans.write() {
            bans.insert(account_id, ban);
        }
    }

    pub fn namelock(&self, character_id: u32) {
        if let Ok(mut locks) = self.namelocks.write() {
            locks.insert(character_id);
        }
    }

    /// Number of `resolve_session` calls served so far.
    pub fn session_lookups(&self) -> usize {
        self.session_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn resolve_session(&self, token: &[u8], character_name: &str) -> Option<SessionRecord> {
        self.session_lookups.fetch_add(1, Ordering::Relaxed);

        let account = self.accounts.iter().find(|a| a.session_token.as_bytes() == token)?;
        let character = account
            .characters
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(character_name))?;

        Some(SessionRecord {
            account_id: account.id,
            authorized_ip: account.authorized_ip,
            character_id: character.id,
        })
    }

    async fn ip_ban(&self, ip: IpAddr) -> Option<BanInfo> {
        self.ip_bans.read().ok()?.get(&ip).cloned()
    }

    async fn account_ban(&self, account_id: u32) -> Option<BanInfo> {
        self.account_bans.read().ok()?.get(&account_id).cloned()
    }

    async fn is_namelocked(&self, character_id: u32) -> bool {
        self.namelocks
            .read()
            .map(|locks| locks.contains(&character_id))
            .unwrap_or(false)
    }

    async fn load_character(&self, character_id: u32) -> Option<CharacterProfile> {
        self.accounts.iter().find_map(|account| {
            account
                .characters
                .iter()
                .find(|c| c.id == character_id)
                .map(|c| CharacterProfile {
                    id: c.id,
                    name: c.name.clone(),
                    account_id: account.id,
                    account_type: account.account_type,
                    can_always_login: c.can_always_login,
                    cannot_be_banned: c.cannot_be_banned,
                    login_position: c.login_position(),
                    temple_position: c.temple_position(),
                })
        })
    }
}

/// A map made only of walkable tiles, minus the ones marked otherwise.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    /// Tiles occupied by something that only forced placement ignores.
    blocked: HashSet<Position>,
    /// Tiles that do not exist.
    void: HashSet<Position>,
    placed: HashMap<u32, Position>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&mut self, position: Position) {
        self.blocked.insert(position);
    }

    pub fn remove_tile(&mut self, position: Position) {
        self.void.insert(position);
    }

    pub fn position_of(&self, character_id: u32) -> Option<Position> {
        self.placed.get(&character_id).copied()
    }

    pub fn population(&self) -> usize {
        self.placed.len()
    }
}

impl GameWorld for MemoryWorld {
    fn place_character(&mut self, character: &CharacterProfile, position: Position, forced: bool) -> bool {
        if self.void.contains(&position) || (!forced && self.blocked.contains(&position)) {
            return false;
        }
        self.placed.insert(character.id, position);
        true
    }

    fn remove_character(&mut self, character_id: u32) {
        self.placed.remove(&character_id);
    }
}
