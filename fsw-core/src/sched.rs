//! Cooperative periodic scheduler
//!
//! A fixed-capacity table of periodic jobs advanced by elapsed-time ticks.
//! The single driver task calls [`Scheduler::step`] at a fixed cadence; due
//! jobs run in registration order, at most once per slot per step. A job
//! that falls behind catches up one period per call rather than bursting.
//! Wrap-around of the millisecond counter is not handled; a `u64` outlives
//! the mission.

/// Maximum number of registered periodic jobs
pub const SCHED_MAX_JOBS: usize = 16;

/// A periodic job body; registered once at startup
pub type JobFn = Box<dyn FnMut() + Send>;

struct Job {
    name: &'static str,
    run: JobFn,
    period_ms: u32,
    next_run_ms: u64,
}

/// Fixed-table cooperative scheduler
pub struct Scheduler {
    now_ms: u64,
    jobs: heapless::Vec<Job, SCHED_MAX_JOBS>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now_ms", &self.now_ms)
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

impl Scheduler {
    /// Create an empty scheduler at time zero
    pub fn new() -> Self {
        Self { now_ms: 0, jobs: heapless::Vec::new() }
    }

    /// Register a periodic job
    ///
    /// The first run lands one full period from now. Returns `false` when
    /// the period is zero or the table is full; the job is not registered.
    pub fn register_periodic<F>(&mut self, name: &'static str, period_ms: u32, job: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        if period_ms == 0 {
            return false;
        }
        let entry = Job {
            name,
            run: Box::new(job),
            period_ms,
            next_run_ms: self.now_ms + u64::from(period_ms),
        };
        if self.jobs.push(entry).is_err() {
            log::error!("scheduler table full, dropping job {name}");
            return false;
        }
        true
    }

    /// Advance time and run every due job once
    ///
    /// Iteration order is registration order; ties run lower slots first.
    /// `next_run` advances by the period, not to `now`, so a chronically
    /// late job gains at most one execution per step.
    pub fn step(&mut self, elapsed_ms: u32) {
        self.now_ms += u64::from(elapsed_ms);
        for job in self.jobs.iter_mut() {
            if self.now_ms >= job.next_run_ms {
                job.next_run_ms += u64::from(job.period_ms);
                (job.run)();
            }
        }
    }

    /// Scheduler-local time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Number of registered jobs
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Names of registered jobs in slot order
    pub fn job_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.jobs.iter().map(|job| job.name)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn rejects_zero_period() {
        let mut sched = Scheduler::new();
        assert!(!sched.register_periodic("bad", 0, || {}));
        assert_eq!(sched.job_count(), 0);
    }

    #[test]
    fn rejects_when_full() {
        let mut sched = Scheduler::new();
        for _ in 0..SCHED_MAX_JOBS {
            assert!(sched.register_periodic("job", 100, || {}));
        }
        assert!(!sched.register_periodic("overflow", 100, || {}));
        assert_eq!(sched.job_count(), SCHED_MAX_JOBS);
    }

    #[test]
    fn runs_at_exact_periods() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut sched = Scheduler::new();
        sched.register_periodic("tick", 100, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sched.step(99);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        sched.step(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // One invocation per full period across many ticks.
        for _ in 0..10 {
            sched.step(10);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn consecutive_invocations_are_one_period_apart() {
        let times = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = Arc::clone(&times);
        let mut sched = Scheduler::new();

        // The job observes the scheduler clock through step granularity.
        let tick_counter = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::clone(&tick_counter);
        sched.register_periodic("sampler", 30, move || {
            let now = ticks.load(Ordering::SeqCst) * 10;
            record.lock().expect("lock").push(now);
        });

        for _ in 0..12 {
            sched.step(10);
            tick_counter.fetch_add(1, Ordering::SeqCst);
        }

        let recorded = times.lock().expect("lock").clone();
        assert_eq!(recorded, vec![20, 50, 80, 110]);
    }

    #[test]
    fn registration_order_is_execution_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut sched = Scheduler::new();
        for id in 0..3u8 {
            let order = Arc::clone(&order);
            sched.register_periodic("ordered", 50, move || {
                order.lock().expect("lock").push(id);
            });
        }
        sched.step(50);
        assert_eq!(*order.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[test]
    fn late_job_catches_up_one_period_per_step() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut sched = Scheduler::new();
        sched.register_periodic("late", 100, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // A 500 ms stall yields one run now and one per subsequent step
        // until the backlog drains.
        sched.step(500);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        sched.step(10);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        sched.step(10);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
