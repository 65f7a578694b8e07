//! Server-wide services shared by every connection.

use crate::config::ServerConfig;
use crate::connection::ConnectionId;
use crate::dispatcher::Dispatcher;
use crate::flush::FlushScheduler;
use crate::handlers::OpcodeRegistry;
use crate::lifecycle::WorldLifecycle;
use crate::pool::BufferPool;
use crate::store::AccountStore;
use shared::rsa::RsaPrivateKey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub rsa: RsaPrivateKey,
    pub store: Arc<dyn AccountStore>,
    pub lifecycle: Arc<WorldLifecycle>,
    pub dispatcher: Dispatcher,
    pub flush: Arc<FlushScheduler>,
    pub pool: Arc<BufferPool>,
    pub handlers: OpcodeRegistry,
    /// Cancelled when the server stops; every connection holds a child token.
    pub shutdown: CancellationToken,
    next_connection_id: AtomicU64,
}

impl ServerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ServerConfig>,
        rsa: RsaPrivateKey,
        store: Arc<dyn AccountStore>,
        lifecycle: Arc<WorldLifecycle>,
        dispatcher: Dispatcher,
        flush: Arc<FlushScheduler>,
        pool: Arc<BufferPool>,
        handlers: OpcodeRegistry,
    ) -> Self {
        Self {
            config,
            rsa,
            store,
            lifecycle,
            dispatcher,
            flush,
            pool,
            handlers,
            shutdown: CancellationToken::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builders for unit tests that need a running game dispatcher.

    use super::*;
    use crate::dispatcher::{self, GameContext};
    use crate::memory::{MemoryAccountStore, MemoryWorld};
    use crate::pool::DEFAULT_POOL_CAPACITY;
    use crate::session::SessionRegistry;
    use crate::waitlist::WaitingList;

    pub fn context_with(config: ServerConfig, world: MemoryWorld) -> Arc<ServerContext> {
        let config = Arc::new(config);
        let lifecycle = Arc::new(WorldLifecycle::new(crate::lifecycle::WorldState::Running));
        let (dispatcher, rx) = Dispatcher::new();
        let context = Arc::new(ServerContext::new(
            Arc::clone(&config),
            shared::rsa::test_keys::private_key(),
            Arc::new(MemoryAccountStore::new(config.accounts.clone())),
            Arc::clone(&lifecycle),
            dispatcher.clone(),
            FlushScheduler::new(config.flush_interval()),
            BufferPool::new(DEFAULT_POOL_CAPACITY),
            OpcodeRegistry::with_defaults(),
        ));

        let game = GameContext {
            sessions: SessionRegistry::new(),
            world: Box::new(world),
            waitlist: WaitingList::new(),
            config,
            lifecycle,
            dispatcher,
        };
        tokio::spawn(dispatcher::run(game, rx, context.shutdown.clone()));
        context
    }

    pub fn context() -> Arc<ServerContext> {
        context_with(ServerConfig::default(), MemoryWorld::new())
    }
}
