//! Synchronization primitives with explicit timeouts
//!
//! Mutex, counting semaphore and bounded queue. A timeout expiry returns
//! [`FswError::Timeout`] and commits nothing; callers decide whether to back
//! off or escalate.

use std::sync::{Condvar, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Instant;

use heapless::Deque;

use crate::error::{FswError, Result};
use crate::osal::time::Timeout;

/// Mutual exclusion with timed acquisition
///
/// Wraps the kernel mutex; on the flight target the acquire path blocks the
/// calling task. Lock poisoning cannot occur in flight builds
/// (`panic = "abort"`); in hosted tests a poisoned lock is recovered by
/// taking the inner value.
#[derive(Debug, Default)]
pub struct Mutex<T> {
    inner: StdMutex<T>,
}

/// Guard returned by [`Mutex::lock`]
pub type MutexGuard<'a, T> = StdMutexGuard<'a, T>;

impl<T> Mutex<T> {
    /// Create a mutex owning `value`
    pub fn new(value: T) -> Self {
        Self { inner: StdMutex::new(value) }
    }

    /// Acquire the mutex, waiting at most `timeout`
    pub fn lock(&self, timeout: Timeout) -> Result<MutexGuard<'_, T>> {
        let start = Instant::now();
        let deadline = timeout.deadline(start);
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                    return Ok(poisoned.into_inner());
                }
                Err(std::sync::TryLockError::WouldBlock) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(FswError::Timeout);
                        }
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// Counting semaphore
#[derive(Debug)]
pub struct Semaphore {
    count: StdMutex<u32>,
    max: u32,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `initial` tokens and a ceiling of `max`
    pub fn new(initial: u32, max: u32) -> Self {
        Self {
            count: StdMutex::new(initial.min(max)),
            max,
            available: Condvar::new(),
        }
    }

    /// Take one token, waiting at most `timeout`
    pub fn take(&self, timeout: Timeout) -> Result<()> {
        let start = Instant::now();
        let deadline = timeout.deadline(start);
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *count > 0 {
                *count -= 1;
                return Ok(());
            }
            count = match deadline {
                None => self
                    .available
                    .wait(count)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FswError::Timeout);
                    }
                    let (guard, _result) = self
                        .available
                        .wait_timeout(count, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
            };
        }
    }

    /// Return one token; saturates at the ceiling
    pub fn give(&self) -> Result<()> {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        if *count >= self.max {
            return Err(FswError::Overflow);
        }
        *count += 1;
        self.available.notify_one();
        Ok(())
    }
}

/// Fixed-capacity message queue
///
/// Send blocks while the queue is full, receive blocks while it is empty,
/// each bounded by the caller's timeout. Capacity is a compile-time constant;
/// the queue never reallocates.
#[derive(Debug)]
pub struct BoundedQueue<T, const N: usize> {
    items: StdMutex<Deque<T, N>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T, const N: usize> BoundedQueue<T, N> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: StdMutex::new(Deque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue `item`, waiting at most `timeout` for space
    pub fn send(&self, item: T, timeout: Timeout) -> Result<()> {
        let start = Instant::now();
        let deadline = timeout.deadline(start);
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending = item;
        loop {
            match items.push_back(pending) {
                Ok(()) => {
                    self.not_empty.notify_one();
                    return Ok(());
                }
                Err(rejected) => {
                    pending = rejected;
                    items = match deadline {
                        None => self
                            .not_full
                            .wait(items)
                            .unwrap_or_else(|e| e.into_inner()),
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                return Err(FswError::Timeout);
                            }
                            let (guard, _result) = self
                                .not_full
                                .wait_timeout(items, deadline - now)
                                .unwrap_or_else(|e| e.into_inner());
                            guard
                        }
                    };
                }
            }
        }
    }

    /// Dequeue the oldest item, waiting at most `timeout`
    pub fn receive(&self, timeout: Timeout) -> Result<T> {
        let start = Instant::now();
        let deadline = timeout.deadline(start);
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            items = match deadline {
                None => self
                    .not_empty
                    .wait(items)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FswError::Timeout);
                    }
                    let (guard, _result) = self
                        .not_empty
                        .wait_timeout(items, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
            };
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compile-time capacity
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

static CRITICAL: StdMutex<()> = StdMutex::new(());

/// Run `body` inside the global critical section
///
/// On the flight target this masks interrupts; hosted it serializes against
/// every other critical section in the process. Keep bodies short.
pub fn critical<T>(body: impl FnOnce() -> T) -> T {
    let _guard = CRITICAL.lock().unwrap_or_else(|e| e.into_inner());
    body()
}
