//! Time service
//!
//! All on-board time derives from the OSAL monotonic millisecond clock:
//! uptime, Mission Elapsed Time, and UTC once the ground has synchronized
//! it. UTC is carried as seconds since the 2000-01-01 epoch, the same epoch
//! the telemetry secondary header uses on the wire.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FswError, Result};
use crate::osal::{Clock, Mutex, Timeout};

/// Split-seconds timestamp; `subseconds` is microseconds within the second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Whole seconds
    pub seconds: u32,
    /// Microseconds within the current second
    pub subseconds: u32,
}

/// Calendar date and time, derived from a synchronized UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

const fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn seconds_to_datetime(total_seconds: u32, microsecond: u32) -> DateTime {
    // Epoch: 2000-01-01 00:00:00
    let mut days = total_seconds / 86_400;
    let remaining = total_seconds % 86_400;

    let hour = (remaining / 3600) as u8;
    let minute = ((remaining % 3600) / 60) as u8;
    let second = (remaining % 60) as u8;

    let mut year: u16 = 2000;
    loop {
        let year_days = if is_leap_year(year) { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }

    let mut month: u8 = 1;
    loop {
        let mut month_days = DAYS_IN_MONTH[(month - 1) as usize];
        if month == 2 && is_leap_year(year) {
            month_days = 29;
        }
        if days < month_days {
            break;
        }
        days -= month_days;
        month += 1;
    }

    DateTime {
        year,
        month,
        day: (days + 1) as u8,
        hour,
        minute,
        second,
        microsecond,
    }
}

struct TimeState {
    met_offset_s: i64,
    utc_base: Timestamp,
    utc_sync_uptime_s: u32,
    drift_ppm: i32,
    utc_synced: bool,
}

/// On-board time keeper
pub struct TimeService {
    clock: Arc<dyn Clock>,
    state: Mutex<TimeState>,
}

impl std::fmt::Debug for TimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeService")
            .field("uptime_ms", &self.uptime_ms())
            .field("synced", &self.is_synced())
            .finish()
    }
}

impl TimeService {
    /// Create a time service over the given monotonic clock
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(TimeState {
                met_offset_s: 0,
                utc_base: Timestamp::default(),
                utc_sync_uptime_s: 0,
                drift_ppm: 0,
                utc_synced: false,
            }),
        }
    }

    /// Milliseconds since boot
    pub fn uptime_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Whole seconds since boot
    pub fn uptime_seconds(&self) -> u32 {
        (self.clock.now_ms() / 1000) as u32
    }

    /// Mission Elapsed Time in seconds
    pub fn met(&self) -> u32 {
        let uptime = i64::from(self.uptime_seconds());
        match self.state.lock(Timeout::Forever) {
            Ok(state) => (uptime + state.met_offset_s).max(0) as u32,
            Err(_) => uptime as u32,
        }
    }

    /// Set Mission Elapsed Time; subsequent reads advance from this value
    pub fn set_met(&self, met_s: u32) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        state.met_offset_s = i64::from(met_s) - i64::from(self.uptime_seconds());
        Ok(())
    }

    /// Whether a UTC reference has been received
    pub fn is_synced(&self) -> bool {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.utc_synced)
            .unwrap_or(false)
    }

    /// Accept a UTC reference (seconds since 2000-01-01)
    pub fn sync_utc(&self, utc: Timestamp) -> Result<()> {
        let uptime = self.uptime_seconds();
        let mut state = self.state.lock(Timeout::Forever)?;
        state.utc_base = utc;
        state.utc_sync_uptime_s = uptime;
        state.utc_synced = true;
        Ok(())
    }

    /// Current UTC with drift correction applied
    ///
    /// Fails with `NotReady` before the first synchronization.
    pub fn utc(&self) -> Result<Timestamp> {
        let uptime_ms = self.uptime_ms();
        let state = self.state.lock(Timeout::Forever)?;
        if !state.utc_synced {
            return Err(FswError::NotReady);
        }

        let mut elapsed = i64::from((uptime_ms / 1000) as u32) - i64::from(state.utc_sync_uptime_s);
        if state.drift_ppm != 0 {
            elapsed += elapsed * i64::from(state.drift_ppm) / 1_000_000;
        }

        Ok(Timestamp {
            seconds: (i64::from(state.utc_base.seconds) + elapsed).max(0) as u32,
            subseconds: ((uptime_ms % 1000) * 1000) as u32,
        })
    }

    /// Timestamp for telemetry headers: UTC when synced, uptime otherwise
    pub fn timestamp(&self) -> Timestamp {
        match self.utc() {
            Ok(ts) => ts,
            Err(_) => {
                let uptime_ms = self.uptime_ms();
                Timestamp {
                    seconds: (uptime_ms / 1000) as u32,
                    subseconds: ((uptime_ms % 1000) * 1000) as u32,
                }
            }
        }
    }

    /// Current calendar date and time, requires UTC sync
    pub fn datetime(&self) -> Result<DateTime> {
        let utc = self.utc()?;
        Ok(seconds_to_datetime(utc.seconds, utc.subseconds))
    }

    /// Set the oscillator drift correction in parts per million
    pub fn set_drift_correction(&self, ppm: i32) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        state.drift_ppm = ppm;
        Ok(())
    }

    /// Current drift correction in parts per million
    pub fn drift_correction(&self) -> i32 {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.drift_ppm)
            .unwrap_or(0)
    }
}

/// Signed difference `a - b` in milliseconds
pub fn diff_ms(a: Timestamp, b: Timestamp) -> i64 {
    let seconds = i64::from(a.seconds) - i64::from(b.seconds);
    let micros = i64::from(a.subseconds) - i64::from(b.subseconds);
    seconds * 1000 + micros / 1000
}
