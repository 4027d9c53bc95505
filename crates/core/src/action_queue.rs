//! Thread-safe FIFO of deferred actions drained on the simulation thread.
//!
//! Background tasks (connection setup, network handlers) never touch
//! simulation state directly; they push a closure here and the simulation
//! loop runs every queued closure, in push order, once per tick.

use std::collections::VecDeque;
use std::sync::Mutex;

type Action<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Multi-producer queue of actions executed against a simulation context `C`.
pub struct ActionQueue<C: ?Sized> {
    actions: Mutex<VecDeque<Action<C>>>,
}

impl<C: ?Sized> ActionQueue<C> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue an action to run on the next drain.
    pub fn push<F>(&self, action: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let mut actions = self
            .actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        actions.push_back(Box::new(action));
    }

    /// Run every queued action in FIFO order. Returns how many ran.
    ///
    /// The lock is released before any action runs, so actions may queue
    /// further actions; those run on the following drain.
    pub fn drain(&self, context: &mut C) -> usize {
        let batch = {
            let mut actions = self
                .actions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *actions)
        };
        let count = batch.len();
        for action in batch {
            action(context);
        }
        count
    }

    /// Number of actions waiting for the next drain.
    pub fn len(&self) -> usize {
        self.actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether no action is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ?Sized> Default for ActionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}
