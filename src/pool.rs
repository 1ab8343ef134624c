//! Resource pools: counting semaphores bounding how many commands may share
//! a scarce resource (e.g. memory-hungry link steps) at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unlimited,
    Slots(usize),
}

struct State {
    available: usize,
    /// Tickets of blocked acquirers, in arrival order.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// A counting semaphore with FIFO fairness. An unlimited pool degenerates to
/// no-ops on every operation.
pub struct ResourcePool {
    name: String,
    capacity: Capacity,
    state: Mutex<State>,
    cond: Condvar,
}

impl ResourcePool {
    pub fn new(name: impl Into<String>, capacity: Capacity) -> Self {
        let available = match capacity {
            Capacity::Unlimited => 0,
            Capacity::Slots(n) => n,
        };
        ResourcePool {
            name: name.into(),
            capacity,
            state: Mutex::new(State {
                available,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Takes a slot if one is free and no earlier acquirer is queued.
    pub fn try_acquire(&self) -> bool {
        if let Capacity::Unlimited = self.capacity {
            return true;
        }
        let mut state = self.state.lock().unwrap();
        if state.available > 0 && state.queue.is_empty() {
            state.available -= 1;
            true
        } else {
            false
        }
    }

    /// Blocks until a slot frees, FIFO order across waiters. Returns false
    /// if `cancel` was raised while waiting; a cancelled waiter leaves the
    /// queue without taking a slot.
    pub fn acquire(&self, cancel: &AtomicBool) -> bool {
        if let Capacity::Unlimited = self.capacity {
            return true;
        }
        let mut state = self.state.lock().unwrap();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        loop {
            if cancel.load(Ordering::Relaxed) {
                state.queue.retain(|&t| t != ticket);
                // The head may have changed; let the next waiter re-check.
                self.cond.notify_all();
                return false;
            }
            if state.available > 0 && state.queue.front() == Some(&ticket) {
                state.queue.pop_front();
                state.available -= 1;
                return true;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, Duration::from_millis(20))
                .unwrap();
            state = guard;
        }
    }

    pub fn release(&self) {
        if let Capacity::Unlimited = self.capacity {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.available += 1;
        drop(state);
        self.cond.notify_all();
    }
}
