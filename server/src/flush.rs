//! Periodic flushing of partially filled output buffers.
//!
//! Connections in steady state register here after login. Every tick the
//! scheduler queues whatever each of them has accumulated, so many small
//! messages produced within one tick leave as a single frame.

use crate::connection::{Connection, ConnectionId};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct FlushScheduler {
    roster: Mutex<HashMap<ConnectionId, Weak<Connection>>>,
    interval: Duration,
    wake: Notify,
    ticks: AtomicU64,
}

impl FlushScheduler {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            roster: Mutex::new(HashMap::new()),
            interval,
            wake: Notify::new(),
            ticks: AtomicU64::new(0),
        })
    }

    fn roster(&self) -> MutexGuard<'_, HashMap<ConnectionId, Weak<Connection>>> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, connection: &Arc<Connection>) {
        let was_empty = {
            let mut roster = self.roster();
            let was_empty = roster.is_empty();
            roster.insert(connection.id(), Arc::downgrade(connection));
            was_empty
        };
        if was_empty {
            self.wake.notify_one();
        }
    }

    pub fn remove(&self, id: ConnectionId) {
        self.roster().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.roster().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster().is_empty()
    }

    /// Completed ticks since start.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Flushes every registered connection once and returns how many had
    /// something to send. Closed connections are pruned.
    pub fn flush_once(&self) -> usize {
        let live: Vec<Arc<Connection>> = {
            let mut roster = self.roster();
            let mut live = Vec::with_capacity(roster.len());
            roster.retain(|_, weak| match weak.upgrade() {
                Some(connection) if !connection.is_disconnected() => {
                    live.push(connection);
                    true
                }
                _ => false,
            });
            live
        };

        self.ticks.fetch_add(1, Ordering::Relaxed);
        live.iter().filter(|connection| connection.flush()).count()
    }

    /// Ticks every interval while at least one connection is registered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Flush scheduler running every {:?}", self.interval);

        loop {
            if self.is_empty() {
                tokio::select! {
                    _ = self.wake.notified() => continue,
                    _ = cancel.cancelled() => break,
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.flush_once();
                }
                _ = cancel.cancelled() => break,
            }
        }

        debug!("Flush scheduler stopped after {} ticks", self.ticks());
    }
}
