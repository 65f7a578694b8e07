//! Binding an authenticated connection to a character in the world.
//!
//! Runs as a game task: the connection gathers everything that needs the
//! account store first, then hands an [`AttachRequest`] to the dispatcher and
//! waits for the [`AttachOutcome`].

use crate::connection::Connection;
use crate::dispatcher::{Dispatcher, GameContext};
use crate::error::LoginRejection;
use crate::lifecycle::WorldState;
use crate::session::{SessionHandle, SessionId};
use crate::store::{BanInfo, CharacterProfile};
use crate::waitlist;
use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

pub struct AttachRequest {
    pub connection: Arc<Connection>,
    pub account_id: u32,
    pub character_id: u32,
    pub os: u16,
    /// `None` when the character could not be loaded.
    pub character: Option<CharacterProfile>,
    pub namelocked: bool,
    pub account_ban: Option<BanInfo>,
}

#[derive(Debug)]
pub enum AttachOutcome {
    Attached(SessionHandle),
    /// The world is full; the client should retry after `retry_seconds`.
    WaitingList { slot: usize, retry_seconds: u8 },
    Rejected(LoginRejection),
    /// The connection closed while the request was pending.
    Abandoned,
}

/// Result of the first game task; a kick defers the outcome to a later one.
enum Step {
    Done(AttachOutcome),
    Deferred(oneshot::Receiver<AttachOutcome>),
}

/// Hands `request` to the game task. `None` if the dispatcher has stopped.
pub async fn request_attach(dispatcher: &Dispatcher, request: AttachRequest) -> Option<AttachOutcome> {
    match dispatcher.call(move |game| attach(game, request)).await? {
        Step::Done(outcome) => Some(outcome),
        Step::Deferred(rx) => rx.await.ok(),
    }
}

fn attach(game: &mut GameContext, request: AttachRequest) -> Step {
    if !game.config.allow_clones {
        if let Some(existing) = game.sessions.find_by_character(request.character_id) {
            return kick_or_reattach(game, existing, request);
        }
    }
    Step::Done(create_session(game, request))
}

fn create_session(game: &mut GameContext, request: AttachRequest) -> AttachOutcome {
    if request.connection.is_disconnected() {
        return AttachOutcome::Abandoned;
    }

    let Some(character) = request.character else {
        return AttachOutcome::Rejected(LoginRejection::CharacterNotLoaded);
    };

    if request.namelocked {
        return AttachOutcome::Rejected(LoginRejection::Namelocked);
    }

    if !character.can_always_login {
        match game.lifecycle.get() {
            WorldState::Closing => return AttachOutcome::Rejected(LoginRejection::GoingDown),
            WorldState::Closed => return AttachOutcome::Rejected(LoginRejection::ServerClosed),
            _ => {}
        }
    }

    if game.config.one_player_per_account
        && !character.is_gamemaster()
        && game.sessions.find_by_account(request.account_id).is_some()
    {
        return AttachOutcome::Rejected(LoginRejection::OneCharacterPerAccount);
    }

    if !character.cannot_be_banned {
        if let Some(ban) = &request.account_ban {
            return AttachOutcome::Rejected(LoginRejection::account_banned(ban));
        }
    }

    let online = game.sessions.len();
    let slot = game
        .waitlist
        .client_login(&character, online, game.config.max_players, Instant::now());
    if slot > 0 {
        return AttachOutcome::WaitingList {
            slot,
            retry_seconds: waitlist::retry_time(slot),
        };
    }

    let placed = game.world.place_character(&character, character.login_position, false)
        || game.world.place_character(&character, character.temple_position, true);
    if !placed {
        return AttachOutcome::Rejected(LoginRejection::TemplePositionWrong);
    }

    let name = character.name.clone();
    let handle = game.sessions.insert(character, request.os, &request.connection);
    if !request.connection.set_session(handle.clone()) {
        // Closed since the check above; undo so no session points at it.
        game.sessions.remove(handle.id());
        game.world.remove_character(handle.character_id());
        debug!("Connection {} closed before {} could enter", request.connection.id(), name);
        return AttachOutcome::Abandoned;
    }
    info!("{} entered the world, {} online", name, game.sessions.len());
    AttachOutcome::Attached(handle)
}

fn kick_or_reattach(game: &mut GameContext, existing: SessionId, request: AttachRequest) -> Step {
    let replace = game.config.replace_kick_on_login;
    let delay = game.config.kick_reattach_delay();

    let Some(session) = game.sessions.get_mut(existing) else {
        return Step::Done(AttachOutcome::Rejected(LoginRejection::AlreadyLoggedIn));
    };
    if session.reconnect_pending || !replace {
        return Step::Done(AttachOutcome::Rejected(LoginRejection::AlreadyLoggedIn));
    }

    let Some(old) = session.live_connection() else {
        return Step::Done(reattach(game, existing, request));
    };

    debug!(
        "Kicking connection {} of {} for a new login",
        old.id(),
        session.character().name
    );
    session.reconnect_pending = true;
    old.close();

    let (tx, rx) = oneshot::channel();
    game.dispatcher.schedule(delay, move |game| {
        let _ = tx.send(reattach(game, existing, request));
    });
    Step::Deferred(rx)
}

fn reattach(game: &mut GameContext, existing: SessionId, request: AttachRequest) -> AttachOutcome {
    let Some(session) = game.sessions.get_mut(existing) else {
        return AttachOutcome::Rejected(LoginRejection::AlreadyLoggedIn);
    };
    session.reconnect_pending = false;

    if request.connection.is_disconnected() {
        return AttachOutcome::Abandoned;
    }
    if session.live_connection().is_some() {
        return AttachOutcome::Rejected(LoginRejection::AlreadyLoggedIn);
    }

    session.attach(&request.connection, request.os);
    let handle = session.handle();
    if !request.connection.set_session(handle.clone()) {
        session.detach(request.connection.id());
        return AttachOutcome::Abandoned;
    }
    info!("{} reattached to a new connection", session.character().name);
    AttachOutcome::Attached(handle)
}
