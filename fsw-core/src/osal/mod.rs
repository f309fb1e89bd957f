//! Operating system abstraction layer
//!
//! Portable wrappers around the kernel primitives the core depends on:
//! mutexes and semaphores with explicit timeouts, bounded message queues,
//! and a monotonic millisecond clock. On the flight target these map onto
//! the RTOS; in this hosted build they are backed by `std::sync` so the core
//! can be exercised and tested on a workstation. All storage is
//! fixed-capacity.

pub mod sync;
pub mod time;

pub use sync::{critical, BoundedQueue, Mutex, MutexGuard, Semaphore};
pub use time::{Clock, SimClock, SystemClock, Ticker, Timeout};
