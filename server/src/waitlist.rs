//! Login queue used when the world is full.

use crate::store::CharacterProfile;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Extra time a queued client has to come back before losing its place.
const GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
struct WaitEntry {
    character_id: u32,
    expires_at: Instant,
}

/// FIFO of characters waiting for a free slot.
#[derive(Debug, Default)]
pub struct WaitingList {
    entries: VecDeque<WaitEntry>,
}

/// Seconds a client at `slot` (1-based) should wait before retrying.
pub fn retry_time(slot: usize) -> u8 {
    match slot {
        0..=4 => 5,
        5..=9 => 10,
        10..=19 => 20,
        20..=49 => 60,
        _ => 120,
    }
}

fn timeout(slot: usize) -> Duration {
    Duration::from_secs(u64::from(retry_time(slot))) + GRACE
}

impl WaitingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether `character` may enter a world with `online` players.
    ///
    /// Returns 0 when admitted, otherwise the 1-based place on the list.
    pub fn client_login(&mut self, character: &CharacterProfile, online: usize, max_players: usize, now: Instant) -> usize {
        if character.can_always_login || character.is_gamemaster() {
            return 0;
        }

        if max_players == 0 || (self.entries.is_empty() && online < max_players) {
            return 0;
        }

        self.entries.retain(|entry| entry.expires_at > now);

        if let Some(index) = self.entries.iter().position(|e| e.character_id == character.id) {
            let slot = index + 1;
            if online + slot <= max_players {
                self.entries.remove(index);
                return 0;
            }
            self.entries[index].expires_at = now + timeout(slot);
            return slot;
        }

        let slot = self.entries.len() + 1;
        self.entries.push_back(WaitEntry {
            character_id: character.id,
            expires_at: now + timeout(slot),
        });
        slot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccountType;
    use shared::Position;

    fn character(id: u32) -> CharacterProfile {
        CharacterProfile {
            id,
            name: format!("Player {}", id),
            account_id: id,
            account_type: AccountType::Normal,
            can_always_login: false,
            cannot_be_banned: false,
            login_position: Position::default(),
            temple_position: Position::default(),
        }
    }

    #[test]
    fn test_retry_time_buckets() {
        assert_eq!(retry_time(1), 5);
        assert_eq!(retry_time(5), 10);
        assert_eq!(retry_time(19), 20);
        assert_eq!(retry_time(49), 60);
        assert_eq!(retry_time(50), 120);
    }

    #[test]
    fn test_no_cap_admits_everyone() {
        let mut list = WaitingList::new();
        assert_eq!(list.client_login(&character(1), 10_000, 0, Instant::now()), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_full_world_queues_in_order() {
        let mut list = WaitingList::new();
        let now = Instant::now();
        assert_eq!(list.client_login(&character(1), 2, 2, now), 1);
        assert_eq!(list.client_login(&character(2), 2, 2, now), 2);
        // Asking again keeps the place.
        assert_eq!(list.client_login(&character(1), 2, 2, now), 1);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_queued_client_is_admitted_when_slot_frees() {
        let mut list = WaitingList::new();
        let now = Instant::now();
        assert_eq!(list.client_login(&character(1), 2, 2, now), 1);
        assert_eq!(list.client_login(&character(1), 1, 2, now), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_newcomer_cannot_jump_the_queue() {
        let mut list = WaitingList::new();
        let now = Instant::now();
        assert_eq!(list.client_login(&character(1), 2, 2, now), 1);
        // A slot opened, but someone is already waiting.
        assert_eq!(list.client_login(&character(2), 1, 2, now), 2);
    }

    #[test]
    fn test_entries_expire() {
        let mut list = WaitingList::new();
        let now = Instant::now();
        assert_eq!(list.client_login(&character(1), 2, 2, now), 1);
        let later = now + Duration::from_secs(21);
        assert_eq!(list.client_login(&character(2), 2, 2, later), 1);
    }

    #[test]
    fn test_privileged_characters_bypass() {
        let mut list = WaitingList::new();
        let mut gm = character(1);
        gm.account_type = AccountType::Gamemaster;
        assert_eq!(list.client_login(&gm, 5, 2, Instant::now()), 0);

        let mut vip = character(2);
        vip.can_always_login = true;
        assert_eq!(list.client_login(&vip, 5, 2, Instant::now()), 0);
    }
}
