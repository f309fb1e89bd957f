//! Monotonic time services
//!
//! Every blocking OSAL call takes an explicit [`Timeout`]; every time-stamped
//! record in the core reads a [`Clock`]. The simulated clock lets tests and
//! the scheduler advance time deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Wait policy for blocking OSAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail immediately if the resource is unavailable
    NoWait,
    /// Wait up to the given number of milliseconds
    Millis(u32),
    /// Wait until the resource becomes available
    Forever,
}

impl Timeout {
    /// Deadline for this policy measured from `start`, if one exists
    pub(crate) fn deadline(&self, start: Instant) -> Option<Instant> {
        match self {
            Timeout::NoWait => Some(start),
            Timeout::Millis(ms) => Some(start + Duration::from_millis(u64::from(*ms))),
            Timeout::Forever => None,
        }
    }
}

/// Monotonic millisecond clock
///
/// Implementations must never move backwards. Wrap-around is not handled;
/// the mission lifetime bounds a `u64` millisecond counter comfortably.
pub trait Clock: Send + Sync {
    /// Milliseconds since the clock's origin (boot)
    fn now_ms(&self) -> u64;

    /// Whole seconds since the clock's origin
    fn now_seconds(&self) -> u32 {
        (self.now_ms() / 1000) as u32
    }
}

/// Wall clock anchored at construction time
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is "now"
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually-advanced clock for deterministic tests and simulation
#[derive(Debug, Default)]
pub struct SimClock {
    now_ms: AtomicU64,
}

impl SimClock {
    /// Create a simulated clock starting at zero
    pub fn new() -> Self {
        Self { now_ms: AtomicU64::new(0) }
    }

    /// Advance the clock by `delta_ms`
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time; must not move backwards
    pub fn set(&self, absolute_ms: u64) {
        self.now_ms.store(absolute_ms, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Periodic callback driver
///
/// Hosted stand-in for the RTOS software timer: a dedicated thread invokes
/// the callback at a fixed period until the ticker is dropped. The callback
/// must be short and non-blocking, as on the flight target.
#[derive(Debug)]
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a ticker invoking `tick` every `period`
    pub fn spawn<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut next = Instant::now() + period;
            while !stop_flag.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now < next {
                    std::thread::sleep(next - now);
                }
                next += period;
                tick();
            }
        });
        Self { stop, handle: Some(handle) }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_clock_advances() {
        let clock = SimClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.advance(1500);
        assert_eq!(clock.now_ms(), 1500);
        assert_eq!(clock.now_seconds(), 1);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn ticker_fires_and_stops() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        {
            let _ticker = Ticker::spawn(Duration::from_millis(5), move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(60));
        }
        let fired = counter.load(Ordering::SeqCst);
        assert!(fired > 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), fired);
    }
}
