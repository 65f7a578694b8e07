//! Server network layer: TCP listener and coordination of the server-wide tasks

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::context::ServerContext;
use crate::dispatcher::{self, Dispatcher, GameContext, GameTask};
use crate::error::ServerError;
use crate::flush::FlushScheduler;
use crate::handlers::{OpcodeHandler, OpcodeRegistry};
use crate::lifecycle::{WorldLifecycle, WorldState};
use crate::memory::{MemoryAccountStore, MemoryWorld};
use crate::pool::{BufferPool, DEFAULT_POOL_CAPACITY};
use crate::session::SessionRegistry;
use crate::store::{AccountStore, GameWorld};
use crate::waitlist::WaitingList;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Server builder: collaborators are swapped in before [`Server::start`].
pub struct Server {
    config: Arc<ServerConfig>,
    store: Arc<dyn AccountStore>,
    world: Box<dyn GameWorld>,
    handlers: OpcodeRegistry,
}

impl Server {
    /// Validates `config` and sets up the in-memory collaborators from it.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let store = Arc::new(MemoryAccountStore::new(config.accounts.clone()));

        Ok(Server {
            config: Arc::new(config),
            store,
            world: Box::new(MemoryWorld::new()),
            handlers: OpcodeRegistry::with_defaults(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_world(mut self, world: impl GameWorld + 'static) -> Self {
        self.world = Box::new(world);
        self
    }

    /// Registers an extra steady-state handler, replacing any built-in one.
    pub fn with_handler(mut self, opcode: u8, handler: Arc<dyn OpcodeHandler>) -> Self {
        self.handlers.register(opcode, handler);
        self
    }

    /// Binds the listener and starts the dispatcher, the flush scheduler and
    /// the accept loop. The world leaves `Startup` once all three are running.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let rsa = self.config.rsa_key()?;
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let lifecycle = Arc::new(WorldLifecycle::new(WorldState::Startup));
        let (dispatcher, rx) = Dispatcher::new();
        let context = Arc::new(ServerContext::new(
            Arc::clone(&self.config),
            rsa,
            self.store,
            Arc::clone(&lifecycle),
            dispatcher.clone(),
            FlushScheduler::new(self.config.flush_interval()),
            BufferPool::new(DEFAULT_POOL_CAPACITY),
            self.handlers,
        ));

        let game = GameContext {
            sessions: SessionRegistry::new(),
            world: self.world,
            waitlist: WaitingList::new(),
            config: Arc::clone(&self.config),
            lifecycle: Arc::clone(&lifecycle),
            dispatcher,
        };

        let tasks = vec![
            Self::spawn_dispatcher(game, rx, context.shutdown.clone()),
            Self::spawn_flush_scheduler(&context),
            Self::spawn_acceptor(listener, Arc::clone(&context)),
        ];

        lifecycle.set(WorldState::Running);
        info!("Server started successfully");

        Ok(ServerHandle {
            local_addr,
            context,
            tasks,
        })
    }

    /// Spawns task that runs game tasks in order
    fn spawn_dispatcher(
        game: GameContext,
        rx: mpsc::UnboundedReceiver<GameTask>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(dispatcher::run(game, rx, cancel))
    }

    /// Spawns task that periodically flushes connection output
    fn spawn_flush_scheduler(context: &Arc<ServerContext>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&context.flush).run(context.shutdown.clone()))
    }

    /// Spawns task that accepts connections until shutdown
    fn spawn_acceptor(listener: TcpListener, context: Arc<ServerContext>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let shutdown = context.shutdown.clone();

            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = shutdown.cancelled() => break,
                };

                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                        }
                        Connection::spawn(stream, peer, Arc::clone(&context));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }

            info!("Accept loop stopped");
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    context: Arc<ServerContext>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn lifecycle(&self) -> &Arc<WorldLifecycle> {
        &self.context.lifecycle
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.context.dispatcher
    }

    pub fn flush_scheduler(&self) -> &Arc<FlushScheduler> {
        &self.context.flush
    }

    /// Stops accepting, shuts every connection down and waits for the
    /// server-wide tasks to finish.
    pub async fn stop(self) {
        info!("Server shutting down");
        self.context.lifecycle.set(WorldState::Closed);
        self.context.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Server task panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RsaConfig;
    use shared::rsa::test_keys;
    use std::path::PathBuf;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            rsa: RsaConfig {
                key_file: Some(PathBuf::from(test_keys::PRIVATE_KEY_PATH)),
                ..RsaConfig::default()
            },
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let handle = Server::new(config()).unwrap().start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.lifecycle().get(), WorldState::Running);

        let sessions = handle.dispatcher().call(|game| game.sessions.len()).await;
        assert_eq!(sessions, Some(0));

        let context = Arc::clone(handle.context());
        handle.stop().await;
        assert!(context.shutdown.is_cancelled());
        assert!(!context.dispatcher.add_task(|_| {}));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..config()
        };

        let result = Server::new(config).unwrap().start().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_missing_key_file_refuses_to_start() {
        let mut config = config();
        config.rsa.key_file = Some(PathBuf::from("/nonexistent/key.pem"));

        let result = Server::new(config).unwrap().start().await;
        assert!(matches!(result, Err(ServerError::KeyRead { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            client_version_min: 1311,
            client_version_max: 1310,
            ..config()
        };
        assert!(matches!(Server::new(config), Err(ServerError::InvalidConfig(_))));
    }
}
