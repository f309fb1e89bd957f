//! Power monitoring and the EPS sample-and-decide job
//!
//! The EPS hardware is outside the core; this service samples its snapshot
//! once per second and turns battery state into decisions: a critically low
//! battery raises a `PowerCritical` fault (FDIR sheds load), a low battery
//! requests LOW_POWER, and recovery above the nominal threshold clears both.
//! Decisions are edge-triggered so a sagging battery does not spam the
//! event log.

use std::sync::Arc;

use crate::fdir::{FaultKind, FdirEngine};
use crate::mode::ModeManager;
use crate::osal::{Mutex, Timeout};
use crate::providers::{PowerProvider, PowerSnapshot};
use crate::types::{SubsystemId, SystemMode};

/// SOC at or below which the battery is critical (percent)
pub const BATTERY_CRITICAL_SOC: u8 = 10;

/// SOC at or below which LOW_POWER is requested (percent)
pub const BATTERY_LOW_SOC: u8 = 20;

/// SOC at or above which low-power measures are released (percent)
pub const BATTERY_NOMINAL_SOC: u8 = 50;

struct PowerState {
    last: PowerSnapshot,
    low_power_engaged: bool,
    critical_engaged: bool,
}

/// The EPS watcher
pub struct PowerMonitor {
    state: Mutex<PowerState>,
    provider: Arc<dyn PowerProvider>,
    fdir: Arc<FdirEngine>,
    mode: Arc<ModeManager>,
}

impl std::fmt::Debug for PowerMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerMonitor").field("last", &self.snapshot()).finish()
    }
}

impl PowerMonitor {
    /// Create the monitor with its collaborators injected
    pub fn new(
        provider: Arc<dyn PowerProvider>,
        fdir: Arc<FdirEngine>,
        mode: Arc<ModeManager>,
    ) -> Self {
        let last = provider.power();
        Self {
            state: Mutex::new(PowerState {
                last,
                low_power_engaged: false,
                critical_engaged: false,
            }),
            provider,
            fdir,
            mode,
        }
    }

    /// Most recent snapshot taken by [`periodic`](Self::periodic)
    pub fn snapshot(&self) -> PowerSnapshot {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.last)
            .unwrap_or(PowerSnapshot::nominal())
    }

    /// Whether the low-power response is currently engaged
    pub fn low_power_engaged(&self) -> bool {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.low_power_engaged)
            .unwrap_or(false)
    }

    /// Sample the EPS and decide
    pub fn periodic(&self) {
        let snapshot = self.provider.power();

        enum Decision {
            None,
            Critical,
            EnterLowPower,
            Recover,
        }

        let decision = match self.state.lock(Timeout::Forever) {
            Ok(mut state) => {
                state.last = snapshot;
                if snapshot.battery_soc <= BATTERY_CRITICAL_SOC {
                    if state.critical_engaged {
                        Decision::None
                    } else {
                        state.critical_engaged = true;
                        state.low_power_engaged = true;
                        Decision::Critical
                    }
                } else if snapshot.battery_soc <= BATTERY_LOW_SOC {
                    if state.low_power_engaged {
                        Decision::None
                    } else {
                        state.low_power_engaged = true;
                        Decision::EnterLowPower
                    }
                } else if snapshot.battery_soc >= BATTERY_NOMINAL_SOC
                    && (state.low_power_engaged || state.critical_engaged)
                {
                    state.low_power_engaged = false;
                    state.critical_engaged = false;
                    Decision::Recover
                } else {
                    Decision::None
                }
            }
            Err(_) => Decision::None,
        };

        match decision {
            Decision::None => {}
            Decision::Critical => {
                self.fdir.report_fault(FaultKind::PowerCritical, SubsystemId::Eps);
            }
            Decision::EnterLowPower => {
                // A denied transition (e.g. already in SAFE) is acceptable;
                // the battery state will be re-evaluated next period.
                let _ = self.mode.request(SystemMode::LowPower);
            }
            Decision::Recover => {
                self.fdir.clear_fault(FaultKind::PowerCritical);
            }
        }
    }
}
