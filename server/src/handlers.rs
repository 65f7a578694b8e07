//! Steady-state opcode handlers.
//!
//! The connection core only decodes the opcode; what it means is up to the
//! handler registered for it. Handlers run on the connection's reader task
//! and must not block. Anything touching game state goes through the
//! dispatcher.

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::session::SessionHandle;
use crate::writer;
use log::{info, trace};
use shared::{client_opcode, IncomingMessage};
use std::sync::Arc;

/// What a handler gets to work with besides the message.
pub struct HandlerContext<'a> {
    pub connection: &'a Arc<Connection>,
    pub session: &'a SessionHandle,
    pub dispatcher: &'a Dispatcher,
}

pub trait OpcodeHandler: Send + Sync {
    /// Handles one decrypted message. The cursor sits just after the opcode.
    fn handle(&self, msg: &mut IncomingMessage, ctx: &HandlerContext<'_>);
}

impl<F> OpcodeHandler for F
where
    F: Fn(&mut IncomingMessage, &HandlerContext<'_>) + Send + Sync,
{
    fn handle(&self, msg: &mut IncomingMessage, ctx: &HandlerContext<'_>) {
        self(msg, ctx)
    }
}

pub struct OpcodeRegistry {
    handlers: [Option<Arc<dyn OpcodeHandler>>; 256],
}

impl OpcodeRegistry {
    /// A registry with no handlers at all.
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// Ping, ping-back, logout and disconnect.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(client_opcode::PING, Arc::new(ping));
        registry.register(client_opcode::PING_BACK, Arc::new(ping_back));
        registry.register(client_opcode::LOGOUT, Arc::new(logout));
        registry.register(client_opcode::DISCONNECT, Arc::new(disconnect));
        registry
    }

    /// Installs `handler` for `opcode`, returning the one it replaces.
    pub fn register(&mut self, opcode: u8, handler: Arc<dyn OpcodeHandler>) -> Option<Arc<dyn OpcodeHandler>> {
        self.handlers[usize::from(opcode)].replace(handler)
    }

    pub fn contains(&self, opcode: u8) -> bool {
        self.handlers[usize::from(opcode)].is_some()
    }

    /// Runs the handler for `opcode`; `false` if none is registered.
    pub fn dispatch(&self, opcode: u8, msg: &mut IncomingMessage, ctx: &HandlerContext<'_>) -> bool {
        match &self.handlers[usize::from(opcode)] {
            Some(handler) => {
                handler.handle(msg, ctx);
                true
            }
            None => false,
        }
    }
}

impl Default for OpcodeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn ping(_msg: &mut IncomingMessage, ctx: &HandlerContext<'_>) {
    ctx.connection.enqueue(&writer::ping_back());
}

fn ping_back(_msg: &mut IncomingMessage, ctx: &HandlerContext<'_>) {
    trace!("Connection {} answered ping", ctx.connection.id());
}

/// Takes the character out of the world, then closes the connection.
fn logout(_msg: &mut IncomingMessage, ctx: &HandlerContext<'_>) {
    let session_id = ctx.session.id();
    let character_id = ctx.session.character_id();
    ctx.dispatcher.add_task(move |game| {
        if let Some(session) = game.sessions.remove(session_id) {
            game.world.remove_character(character_id);
            info!("{} logged out", session.character().name);
        }
    });
    ctx.connection.close();
}

fn disconnect(_msg: &mut IncomingMessage, ctx: &HandlerContext<'_>) {
    ctx.connection.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults_cover_core_opcodes() {
        let registry = OpcodeRegistry::with_defaults();
        for opcode in [
            client_opcode::PING,
            client_opcode::PING_BACK,
            client_opcode::LOGOUT,
            client_opcode::DISCONNECT,
        ] {
            assert!(registry.contains(opcode));
        }
        assert!(!registry.contains(0x64));
        assert!(!OpcodeRegistry::new().contains(client_opcode::PING));
    }

    #[test]
    fn test_register_replaces_previous_handler() {
        let mut registry = OpcodeRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = move |_: &mut IncomingMessage, _: &HandlerContext<'_>| {
            counter.fetch_add(1, Ordering::Relaxed);
        };

        assert!(registry.register(0x64, Arc::new(handler)).is_none());
        assert!(registry.register(0x64, Arc::new(disconnect)).is_some());
        assert!(registry.contains(0x64));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }
}
