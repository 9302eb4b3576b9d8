// Input relay: the bounded per-player queue of key tokens.
//
// Each `PlayerRecord` owns one `InputQueue`. The player's local session is
// the only producer; the opponent's forwarding session is the only consumer.
// Neither side may block on the other, so both operations are non-blocking:
// - `push` never waits. When the queue is full the oldest token is dropped
//   and returned to the caller, so a stalled consumer costs stale input
//   rather than stalling the producer.
// - `try_pop` returns `None` immediately when nothing is queued.
//
// The queue is guarded by its own mutex, independent of the room lock. Lock
// scope is a single `VecDeque` operation; no I/O happens under it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of tokens a queue holds before dropping the oldest.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Bounded FIFO of input tokens with drop-oldest overflow.
#[derive(Debug)]
pub struct InputQueue {
    capacity: usize,
    tokens: Mutex<VecDeque<String>>,
}

impl InputQueue {
    /// Create an empty queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a token. If the queue was full, the oldest token is evicted
    /// and returned.
    pub fn push(&self, token: String) -> Option<String> {
        let mut tokens = self.lock();
        let dropped = if tokens.len() >= self.capacity {
            tokens.pop_front()
        } else {
            None
        };
        tokens.push_back(token);
        dropped
    }

    /// Take the oldest token, if any.
    pub fn try_pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panicking holder can only have been inside a single VecDeque call,
    // which leaves the deque valid.
    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
