//! World lifecycle shared between connection tasks and game logic.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorldState {
    Startup = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
    Maintain = 4,
}

impl WorldState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorldState::Startup,
            1 => WorldState::Running,
            2 => WorldState::Closing,
            3 => WorldState::Closed,
            _ => WorldState::Maintain,
        }
    }
}

/// Current [`WorldState`], readable without locking.
#[derive(Debug)]
pub struct WorldLifecycle {
    state: AtomicU8,
}

impl WorldLifecycle {
    pub fn new(state: WorldState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
        }
    }

    pub fn get(&self) -> WorldState {
        WorldState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: WorldState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for WorldLifecycle {
    fn default() -> Self {
        Self::new(WorldState::Startup)
    }
}
