//! # Timed Queues
//!
//! FIFO queues of sequence numbers shared between the receiver and the
//! transmitter. Every operation acquires the internal lock with a bounded
//! wait; when the wait expires the operation is a no-op (`false` / `None`)
//! and the caller retries on its next loop iteration. A lock that cannot be
//! acquired never blocks an actor indefinitely.
//!
//! [`TimedQueue::unique`] builds the set-like variant that refuses to enqueue
//! a value already present.

use quanta::Instant;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

/// Default lock-acquisition bound.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<u32>,
    /// Present only for the deduplicating variant.
    members: Option<HashSet<u32>>,
}

impl Inner {
    fn forget(&mut self, value: u32) {
        if let Some(members) = self.members.as_mut() {
            members.remove(&value);
        }
    }
}

/// A lock-timeout bounded queue of `u32` sequence numbers.
#[derive(Debug)]
pub struct TimedQueue {
    inner: Mutex<Inner>,
    timeout: Duration,
}

impl TimedQueue {
    /// Plain FIFO queue.
    pub fn new() -> Self {
        Self::with_timeout(false, DEFAULT_LOCK_TIMEOUT)
    }

    /// Deduplicating queue: a value is enqueued at most once at a time.
    pub fn unique() -> Self {
        Self::with_timeout(true, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(unique: bool, timeout: Duration) -> Self {
        TimedQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                members: unique.then(HashSet::new),
            }),
            timeout,
        }
    }

    /// Whether this is the deduplicating variant.
    pub fn is_unique(&self) -> bool {
        self.lock().is_some_and(|inner| inner.members.is_some())
    }

    /// Try to take the lock until the timeout expires.
    fn lock(&self) -> Option<MutexGuard<'_, Inner>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Some(guard),
                // A panicking holder cannot leave the queue half-updated:
                // every mutation below is a single VecDeque/HashSet call pair.
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        tracing::trace!("queue lock timed out");
                        return None;
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Append `value`. Returns `false` on lock timeout, or when the
    /// deduplicating variant already holds `value`.
    pub fn push(&self, value: u32) -> bool {
        let Some(mut inner) = self.lock() else {
            return false;
        };
        if let Some(members) = inner.members.as_mut() {
            if !members.insert(value) {
                return false;
            }
        }
        inner.queue.push_back(value);
        true
    }

    /// Remove and return the front value.
    pub fn pop(&self) -> Option<u32> {
        let mut inner = self.lock()?;
        let value = inner.queue.pop_front()?;
        inner.forget(value);
        Some(value)
    }

    /// Remove the first occurrence of `value`, keeping the order of the rest.
    pub fn remove(&self, value: u32) -> bool {
        let Some(mut inner) = self.lock() else {
            return false;
        };
        match inner.queue.iter().position(|&v| v == value) {
            Some(index) => {
                inner.queue.remove(index);
                inner.forget(value);
                true
            }
            None => false,
        }
    }

    /// Move the front value to the back and return it, under one lock.
    pub fn rotate_front(&self) -> Option<u32> {
        let mut inner = self.lock()?;
        let value = inner.queue.pop_front()?;
        inner.queue.push_back(value);
        Some(value)
    }

    /// Front value without removing it.
    pub fn peek_front(&self) -> Option<u32> {
        self.lock()?.queue.front().copied()
    }

    /// Whether `value` is queued. `None` on lock timeout.
    pub fn contains(&self, value: u32) -> Option<bool> {
        let inner = self.lock()?;
        Some(match inner.members.as_ref() {
            Some(members) => members.contains(&value),
            None => inner.queue.contains(&value),
        })
    }

    /// Number of queued values. `None` on lock timeout.
    pub fn len(&self) -> Option<usize> {
        Some(self.lock()?.queue.len())
    }

    /// Whether the queue is empty. `None` on lock timeout.
    pub fn is_empty(&self) -> Option<bool> {
        Some(self.lock()?.queue.is_empty())
    }

    /// Copy of the queued values, front first.
    pub fn snapshot(&self) -> Option<Vec<u32>> {
        Some(self.lock()?.queue.iter().copied().collect())
    }
}

impl Default for TimedQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order() {
        let q = TimedQueue::new();
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(q.push(3));
        assert_eq!(q.peek_front(), Some(1));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.len(), Some(1));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
        assert_eq!(q.is_empty(), Some(true));
    }

    #[test]
    fn plain_queue_allows_duplicates() {
        let q = TimedQueue::new();
        assert!(q.push(5));
        assert!(q.push(5));
        assert_eq!(q.len(), Some(2));
    }

    #[test]
    fn unique_queue_rejects_duplicates() {
        let q = TimedQueue::unique();
        assert!(q.is_unique());
        assert!(q.push(5));
        assert!(!q.push(5));
        assert_eq!(q.len(), Some(1));
    }

    #[test]
    fn unique_queue_accepts_again_after_pop_or_remove() {
        let q = TimedQueue::unique();
        q.push(5);
        q.push(6);
        assert_eq!(q.pop(), Some(5));
        assert!(q.push(5));
        assert!(q.remove(6));
        assert!(q.push(6));
        assert_eq!(q.snapshot(), Some(vec![5, 6]));
    }

    #[test]
    fn remove_preserves_order() {
        let q = TimedQueue::new();
        for v in [1, 2, 3, 2, 4] {
            q.push(v);
        }
        assert!(q.remove(2));
        assert_eq!(q.snapshot(), Some(vec![1, 3, 2, 4]));
        assert!(!q.remove(9));
    }

    #[test]
    fn rotate_moves_front_to_back() {
        let q = TimedQueue::unique();
        for v in [1, 2, 3] {
            q.push(v);
        }
        assert_eq!(q.rotate_front(), Some(1));
        assert_eq!(q.snapshot(), Some(vec![2, 3, 1]));
        assert_eq!(q.contains(1), Some(true));
        assert_eq!(q.contains(4), Some(false));
    }

    #[test]
    fn operations_time_out_while_lock_is_held() {
        let q = Arc::new(TimedQueue::with_timeout(false, Duration::from_millis(5)));
        q.push(1);

        let guard = q.inner.lock().unwrap();
        let q2 = Arc::clone(&q);
        let blocked = std::thread::spawn(move || {
            (q2.push(2), q2.pop(), q2.len(), q2.remove(1), q2.peek_front())
        })
        .join()
        .unwrap();
        drop(guard);

        assert_eq!(blocked, (false, None, None, false, None));
        assert_eq!(q.snapshot(), Some(vec![1]));
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        let q = Arc::new(TimedQueue::new());
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        while !q.push(t * 1000 + i) {}
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), Some(400));
    }
}
