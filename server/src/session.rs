//! Game sessions: characters in the world and their connection back-references.
//!
//! The registry lives inside the game dispatcher and is only touched from
//! game tasks. A session refers to its connection through a [`Weak`] handle,
//! and a connection refers to its session through a [`SessionHandle`];
//! neither keeps the other alive.

use crate::connection::{Connection, ConnectionId};
use crate::store::CharacterProfile;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub type SessionId = u32;

/// Liveness flags readable from connection tasks.
#[derive(Debug, Default)]
pub struct SessionStatus {
    removed: AtomicBool,
    dead: AtomicBool,
}

impl SessionStatus {
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn set_dead(&self, dead: bool) {
        self.dead.store(dead, Ordering::Release);
    }

    fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

/// Non-owning reference from a connection to its session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    character_id: u32,
    status: Weak<SessionStatus>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn character_id(&self) -> u32 {
        self.character_id
    }

    /// Removed from the world, dead, or already dropped.
    pub fn is_inactive(&self) -> bool {
        match self.status.upgrade() {
            Some(status) => status.is_removed() || status.is_dead(),
            None => true,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    character: CharacterProfile,
    os: u16,
    status: Arc<SessionStatus>,
    connection: Option<(ConnectionId, Weak<Connection>)>,
    /// A kick-and-replace reattachment is scheduled for this session.
    pub reconnect_pending: bool,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn character(&self) -> &CharacterProfile {
        &self.character
    }

    pub fn os(&self) -> u16 {
        self.os
    }

    pub fn status(&self) -> &Arc<SessionStatus> {
        &self.status
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            character_id: self.character.id,
            status: Arc::downgrade(&self.status),
        }
    }

    /// The attached connection, if it is still open.
    pub fn live_connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .as_ref()
            .and_then(|(_, weak)| weak.upgrade())
            .filter(|connection| !connection.is_disconnected())
    }

    pub fn attach(&mut self, connection: &Arc<Connection>, os: u16) {
        self.connection = Some((connection.id(), Arc::downgrade(connection)));
        self.os = os;
    }

    /// Clears the back-reference if it still points at `connection_id`.
    pub fn detach(&mut self, connection_id: ConnectionId) -> bool {
        let attached = self
            .connection
            .as_ref()
            .map_or(false, |(id, _)| *id == connection_id);
        if attached {
            self.connection = None;
        }
        attached
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    next_id: SessionId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Adds a session for `character`, attached to `connection`.
    pub fn insert(&mut self, character: CharacterProfile, os: u16, connection: &Arc<Connection>) -> SessionHandle {
        let id = self.next_id.max(1);
        self.next_id = id.wrapping_add(1);

        let session = Session {
            id,
            character,
            os,
            status: Arc::new(SessionStatus::default()),
            connection: Some((connection.id(), Arc::downgrade(connection))),
            reconnect_pending: false,
        };
        let handle = session.handle();
        self.sessions.insert(id, session);
        handle
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn find_by_character(&self, character_id: u32) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.character.id == character_id)
            .map(|s| s.id)
    }

    pub fn find_by_account(&self, account_id: u32) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.character.account_id == account_id)
            .map(|s| s.id)
    }

    /// Takes the session out of the world; outstanding handles turn inactive.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        session.status.mark_removed();
        Some(session)
    }

    pub fn detach(&mut self, id: SessionId, connection_id: ConnectionId) -> bool {
        self.sessions
            .get_mut(&id)
            .map_or(false, |session| session.detach(connection_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }
}
