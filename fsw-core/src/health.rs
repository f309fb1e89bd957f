//! System health monitor
//!
//! Tracks heartbeats from the long-running tasks and aggregates error and
//! warning counts per subsystem. A task that misses its heartbeat deadline
//! is declared dead once (with an event) until it reports again; the
//! aggregate flags feed the beacon and the system housekeeping packet.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::EventLog;
use crate::osal::{Clock, Mutex, Timeout};
use crate::types::{SubsystemId, SUBSYSTEM_COUNT};

/// Maximum number of monitored tasks
pub const MAX_MONITORED_TASKS: usize = 16;

/// Health flag: at least one monitored task is stale
pub const HEALTH_FLAG_TASK_STALE: u8 = 0x01;

/// Health flag: at least one error has been counted
pub const HEALTH_FLAG_ERRORS: u8 = 0x02;

/// Health flag: at least one warning has been counted
pub const HEALTH_FLAG_WARNINGS: u8 = 0x04;

#[derive(Clone, Copy)]
struct MonitoredTask {
    name: &'static str,
    timeout_ms: u32,
    last_heartbeat_ms: u64,
    alive: bool,
}

/// Aggregate health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Total errors counted since boot
    pub error_count: u32,
    /// Total warnings counted since boot
    pub warning_count: u32,
    /// Number of registered tasks
    pub tasks_registered: u8,
    /// Number of tasks currently past their heartbeat deadline
    pub tasks_stale: u8,
}

struct HealthState {
    tasks: [Option<MonitoredTask>; MAX_MONITORED_TASKS],
    error_counts: [u32; SUBSYSTEM_COUNT],
    warning_counts: [u32; SUBSYSTEM_COUNT],
}

/// Health monitor service
pub struct HealthMonitor {
    state: Mutex<HealthState>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor").field("summary", &self.summary()).finish()
    }
}

impl HealthMonitor {
    /// Create an empty monitor
    pub fn new(clock: Arc<dyn Clock>, events: Arc<EventLog>) -> Self {
        Self {
            state: Mutex::new(HealthState {
                tasks: [None; MAX_MONITORED_TASKS],
                error_counts: [0; SUBSYSTEM_COUNT],
                warning_counts: [0; SUBSYSTEM_COUNT],
            }),
            clock,
            events,
        }
    }

    /// Register a task under `task_id`; heartbeats must arrive within
    /// `timeout_ms` of each other
    pub fn register_task(&self, task_id: usize, name: &'static str, timeout_ms: u32) {
        if task_id >= MAX_MONITORED_TASKS {
            return;
        }
        let now = self.clock.now_ms();
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.tasks[task_id] = Some(MonitoredTask {
                name,
                timeout_ms,
                last_heartbeat_ms: now,
                alive: true,
            });
        }
    }

    /// Record a heartbeat from `task_id`
    pub fn heartbeat(&self, task_id: usize) {
        if task_id >= MAX_MONITORED_TASKS {
            return;
        }
        let now = self.clock.now_ms();
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            if let Some(task) = state.tasks[task_id].as_mut() {
                task.last_heartbeat_ms = now;
                task.alive = true;
            }
        }
    }

    /// Count an error against a subsystem
    pub fn count_error(&self, subsystem: SubsystemId) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            let slot = &mut state.error_counts[subsystem as usize];
            *slot = slot.saturating_add(1);
        }
    }

    /// Count a warning against a subsystem
    pub fn count_warning(&self, subsystem: SubsystemId) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            let slot = &mut state.warning_counts[subsystem as usize];
            *slot = slot.saturating_add(1);
        }
    }

    /// Check heartbeat deadlines; logs once per liveness transition
    pub fn periodic(&self) {
        let now = self.clock.now_ms();
        let mut newly_dead: heapless::Vec<&'static str, MAX_MONITORED_TASKS> = heapless::Vec::new();
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            for task in state.tasks.iter_mut().flatten() {
                let stale = now.saturating_sub(task.last_heartbeat_ms) > u64::from(task.timeout_ms);
                if stale && task.alive {
                    task.alive = false;
                    let _ = newly_dead.push(task.name);
                }
            }
        }
        for name in newly_dead {
            self.events.warning(SubsystemId::Health, name);
            self.count_warning(SubsystemId::Health);
        }
    }

    /// Aggregate counters
    pub fn summary(&self) -> HealthSummary {
        match self.state.lock(Timeout::Forever) {
            Ok(state) => HealthSummary {
                error_count: state.error_counts.iter().sum(),
                warning_count: state.warning_counts.iter().sum(),
                tasks_registered: state.tasks.iter().flatten().count() as u8,
                tasks_stale: state
                    .tasks
                    .iter()
                    .flatten()
                    .filter(|task| !task.alive)
                    .count() as u8,
            },
            Err(_) => HealthSummary::default(),
        }
    }

    /// Packed flag byte for the beacon and housekeeping
    pub fn health_flags(&self) -> u8 {
        let summary = self.summary();
        let mut flags = 0;
        if summary.tasks_stale > 0 {
            flags |= HEALTH_FLAG_TASK_STALE;
        }
        if summary.error_count > 0 {
            flags |= HEALTH_FLAG_ERRORS;
        }
        if summary.warning_count > 0 {
            flags |= HEALTH_FLAG_WARNINGS;
        }
        flags
    }

    /// Whether a specific task is currently alive
    pub fn is_task_alive(&self, task_id: usize) -> bool {
        if task_id >= MAX_MONITORED_TASKS {
            return false;
        }
        self.state
            .lock(Timeout::Forever)
            .ok()
            .and_then(|state| state.tasks[task_id].map(|task| task.alive))
            .unwrap_or(false)
    }
}
