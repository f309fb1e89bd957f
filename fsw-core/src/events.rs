//! On-board event log
//!
//! Fixed-capacity circular log holding the most recent events with bounded
//! messages. The log is the flight record: FDIR, the dispatcher and the mode
//! manager all write here, and the ground can export it filtered by
//! severity. Entries also mirror onto the developer `log` facade so hosted
//! runs show them on the console.

use std::sync::Arc;

use heapless::String as BoundedString;
use serde::{Deserialize, Serialize};

use crate::osal::{Clock, Mutex, Timeout};
use crate::types::{Severity, SubsystemId};

/// Number of entries retained before the oldest is overwritten
pub const EVENT_LOG_CAPACITY: usize = 256;

/// Maximum message length in bytes
pub const EVENT_MSG_MAX: usize = 32;

/// One logged event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Monotonic milliseconds at write time
    pub timestamp_ms: u64,
    /// Event severity
    pub severity: Severity,
    /// Subsystem that reported the event
    pub subsystem: SubsystemId,
    /// Numeric event identifier, 0 when unused
    pub event_id: u16,
    /// Short human-readable message, truncated to fit
    pub message: BoundedString<EVENT_MSG_MAX>,
}

struct LogState {
    entries: heapless::Vec<EventEntry, EVENT_LOG_CAPACITY>,
    write_index: usize,
}

/// Circular event log
pub struct EventLog {
    state: Mutex<LogState>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("count", &self.count()).finish()
    }
}

impl EventLog {
    /// Create an empty log reading timestamps from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: heapless::Vec::new(),
                write_index: 0,
            }),
            clock,
        }
    }

    /// Append an event, overwriting the oldest entry when full
    pub fn write(
        &self,
        severity: Severity,
        subsystem: SubsystemId,
        event_id: u16,
        message: &str,
    ) {
        let mut bounded: BoundedString<EVENT_MSG_MAX> = BoundedString::new();
        for ch in message.chars() {
            if bounded.push(ch).is_err() {
                break;
            }
        }

        match severity {
            Severity::Debug => log::debug!("[{subsystem:?}] {message}"),
            Severity::Info => log::info!("[{subsystem:?}] {message}"),
            Severity::Warning => log::warn!("[{subsystem:?}] {message}"),
            Severity::Error | Severity::Critical => {
                log::error!("[{subsystem:?}] event {event_id}: {message}")
            }
        }

        let entry = EventEntry {
            timestamp_ms: self.clock.now_ms(),
            severity,
            subsystem,
            event_id,
            message: bounded,
        };

        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            let index = state.write_index;
            if state.entries.len() < EVENT_LOG_CAPACITY {
                let _ = state.entries.push(entry);
            } else {
                state.entries[index] = entry;
            }
            state.write_index = (index + 1) % EVENT_LOG_CAPACITY;
        }
    }

    /// Log at debug severity
    pub fn debug(&self, subsystem: SubsystemId, message: &str) {
        self.write(Severity::Debug, subsystem, 0, message);
    }

    /// Log at info severity
    pub fn info(&self, subsystem: SubsystemId, message: &str) {
        self.write(Severity::Info, subsystem, 0, message);
    }

    /// Log at warning severity
    pub fn warning(&self, subsystem: SubsystemId, message: &str) {
        self.write(Severity::Warning, subsystem, 0, message);
    }

    /// Log at error severity with an event identifier
    pub fn error(&self, subsystem: SubsystemId, event_id: u16, message: &str) {
        self.write(Severity::Error, subsystem, event_id, message);
    }

    /// Log at critical severity with an event identifier
    pub fn critical(&self, subsystem: SubsystemId, event_id: u16, message: &str) {
        self.write(Severity::Critical, subsystem, event_id, message);
    }

    /// Number of stored entries, saturated at capacity
    pub fn count(&self) -> usize {
        match self.state.lock(Timeout::Forever) {
            Ok(state) => state.entries.len(),
            Err(_) => 0,
        }
    }

    /// Entry at chronological position `index` in `[0, count)`
    pub fn entry(&self, index: usize) -> Option<EventEntry> {
        let state = self.state.lock(Timeout::Forever).ok()?;
        let count = state.entries.len();
        if index >= count {
            return None;
        }
        let actual = if count < EVENT_LOG_CAPACITY {
            index
        } else {
            (state.write_index + index) % EVENT_LOG_CAPACITY
        };
        state.entries.get(actual).cloned()
    }

    /// Most recently written entry
    pub fn latest(&self) -> Option<EventEntry> {
        let count = self.count();
        if count == 0 {
            None
        } else {
            self.entry(count - 1)
        }
    }

    /// Number of entries at or above `min_severity`
    pub fn count_by_severity(&self, min_severity: Severity) -> usize {
        self.filtered_count(|entry| entry.severity >= min_severity)
    }

    /// Number of entries attributed to `subsystem`
    pub fn count_by_subsystem(&self, subsystem: SubsystemId) -> usize {
        self.filtered_count(|entry| entry.subsystem == subsystem)
    }

    fn filtered_count(&self, predicate: impl Fn(&EventEntry) -> bool) -> usize {
        let count = self.count();
        (0..count)
            .filter_map(|i| self.entry(i))
            .filter(|entry| predicate(entry))
            .count()
    }

    /// Copy entries at or above `min_severity` into `out` in chronological
    /// order; returns the number exported
    pub fn export<const N: usize>(
        &self,
        min_severity: Severity,
        out: &mut heapless::Vec<EventEntry, N>,
    ) -> usize {
        let count = self.count();
        let mut exported = 0;
        for i in 0..count {
            if out.is_full() {
                break;
            }
            if let Some(entry) = self.entry(i) {
                if entry.severity >= min_severity && out.push(entry).is_ok() {
                    exported += 1;
                }
            }
        }
        exported
    }

    /// Discard all entries
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.entries.clear();
            state.write_index = 0;
        }
    }
}
