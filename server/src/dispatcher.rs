//! Game task queue.
//!
//! All game state (sessions, world, waiting list) is owned by a single task
//! that runs closures sent over a channel, so game logic never blocks an I/O
//! task and never needs a lock of its own.

use crate::config::ServerConfig;
use crate::lifecycle::WorldLifecycle;
use crate::session::SessionRegistry;
use crate::store::GameWorld;
use crate::waitlist::WaitingList;
use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type GameTask = Box<dyn FnOnce(&mut GameContext) + Send>;

/// State owned by the dispatcher task.
pub struct GameContext {
    pub sessions: SessionRegistry,
    pub world: Box<dyn GameWorld>,
    pub waitlist: WaitingList,
    pub config: Arc<ServerConfig>,
    pub lifecycle: Arc<WorldLifecycle>,
    pub dispatcher: Dispatcher,
}

/// Cloneable sender side of the game task queue.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<GameTask>,
    scheduled: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GameTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            tx,
            scheduled: Arc::new(AtomicUsize::new(0)),
        };
        (dispatcher, rx)
    }

    /// Queues `task`; returns `false` once the dispatcher has stopped.
    pub fn add_task<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut GameContext) + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }

    /// Queues `task` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> JoinHandle<()>
    where
        F: FnOnce(&mut GameContext) + Send + 'static,
    {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !dispatcher.add_task(task) {
                debug!("Dropped scheduled task, dispatcher stopped");
            }
        })
    }

    /// Runs `f` on the game task and waits for its result.
    pub async fn call<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut GameContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if !self.add_task(move |ctx| {
            let _ = tx.send(f(ctx));
        }) {
            return None;
        }
        rx.await.ok()
    }

    /// Total number of delayed tasks scheduled so far.
    pub fn scheduled_tasks(&self) -> usize {
        self.scheduled.load(Ordering::Relaxed)
    }
}

/// Runs game tasks in order until cancelled or every sender is gone.
pub async fn run(mut ctx: GameContext, mut rx: mpsc::UnboundedReceiver<GameTask>, cancel: CancellationToken) {
    info!("Game dispatcher started");

    loop {
        tokio::select! {
            task = rx.recv() => match task {
                Some(task) => task(&mut ctx),
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    info!("Game dispatcher stopped with {} sessions online", ctx.sessions.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;
    use crate::session::SessionRegistry;
    use tokio::time::Instant;

    fn spawn_dispatcher() -> (Dispatcher, CancellationToken) {
        let (dispatcher, rx) = Dispatcher::new();
        let ctx = GameContext {
            sessions: SessionRegistry::new(),
            world: Box::new(MemoryWorld::new()),
            waitlist: WaitingList::new(),
            config: Arc::new(ServerConfig::default()),
            lifecycle: Arc::new(WorldLifecycle::default()),
            dispatcher: dispatcher.clone(),
        };
        let cancel = CancellationToken::new();
        tokio::spawn(run(ctx, rx, cancel.clone()));
        (dispatcher, cancel)
    }

    #[tokio::test]
    async fn test_tasks_run_in_order() {
        let (dispatcher, _cancel) = spawn_dispatcher();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..10 {
            let log = Arc::clone(&log);
            assert!(dispatcher.add_task(move |_| log.lock().unwrap().push(i)));
        }

        assert_eq!(dispatcher.call(|ctx| ctx.sessions.len()).await, Some(0));
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_after_delay() {
        let (dispatcher, _cancel) = spawn_dispatcher();
        let (tx, rx) = oneshot::channel();
        let start = Instant::now();

        dispatcher.schedule(Duration::from_millis(1000), move |_| {
            let _ = tx.send(Instant::now());
        });

        let fired = rx.await.unwrap();
        assert!(fired - start >= Duration::from_millis(1000));
        assert_eq!(dispatcher.scheduled_tasks(), 1);
    }

    #[tokio::test]
    async fn test_stopped_dispatcher_refuses_tasks() {
        let (dispatcher, cancel) = spawn_dispatcher();
        cancel.cancel();
        // Wait for the loop to observe cancellation and drop the receiver.
        for _ in 0..100 {
            if !dispatcher.add_task(|_| {}) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dispatcher.call(|_| ()).await.is_none());
    }
}
