//! Fault detection, isolation and recovery
//!
//! Faults are reported by kind and attributed to a subsystem; a static rule
//! table maps each kind to an occurrence threshold and a recovery action.
//! The periodic pass watches for reset loops, executes due actions, and —
//! once the vehicle has been stably NOMINAL — clears the persistent reset
//! counters so old history cannot force SAFE on the next boot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boot::{BootRecord, BootReport};
use crate::bsp::{Bsp, PowerRail};
use crate::events::EventLog;
use crate::mode::ModeManager;
use crate::osal::{Clock, Mutex, Timeout};
use crate::types::{ResetCause, SubsystemId, SystemMode, SUBSYSTEM_COUNT};

/// Number of fault kinds
pub const FAULT_KIND_COUNT: usize = 11;

/// Boot count at which a watchdog-caused boot is treated as a reset loop
pub const RESET_LOOP_BOOTS: u32 = 3;

/// Seconds of fault-free NOMINAL operation before the persistent reset
/// counters are cleared
pub const NOMINAL_STABLE_SECS: u32 = 300;

/// Fault classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FaultKind {
    WatchdogTimeout = 0,
    Brownout,
    ResetLoop,
    SensorInvalid,
    ActuatorFail,
    BusError,
    MemoryError,
    CommLoss,
    PowerCritical,
    ThermalLimit,
    AttitudeLost,
}

impl FaultKind {
    /// All kinds in record-table order
    pub const ALL: [FaultKind; FAULT_KIND_COUNT] = [
        FaultKind::WatchdogTimeout,
        FaultKind::Brownout,
        FaultKind::ResetLoop,
        FaultKind::SensorInvalid,
        FaultKind::ActuatorFail,
        FaultKind::BusError,
        FaultKind::MemoryError,
        FaultKind::CommLoss,
        FaultKind::PowerCritical,
        FaultKind::ThermalLimit,
        FaultKind::AttitudeLost,
    ];
}

/// Recovery actions a rule can demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// No action
    None,
    /// Leave the fault for the owning subsystem to retry
    Retry,
    /// Mark the subsystem isolated; the owner must honor the flag
    Isolate,
    /// Pulse the subsystem reset line
    ResetSubsystem,
    /// Force the vehicle into SAFE
    SafeMode,
    /// Software-reset the whole system
    SystemReset,
    /// Cut the payload power rail
    PayloadOff,
    /// Cut all non-essential power rails
    LoadShed,
}

/// One recovery rule: `threshold` occurrences trigger `action`
///
/// `window_ms` is carried for a future rolling-window variant; the current
/// contract compares the threshold to the monotonic occurrence count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Fault kind this rule applies to
    pub kind: FaultKind,
    /// Occurrence count at which the action fires
    pub threshold: u32,
    /// Observation window hint in milliseconds (0 = none)
    pub window_ms: u32,
    /// Action to execute
    pub action: RecoveryAction,
}

/// Static recovery rule table
pub const RULES: [Rule; FAULT_KIND_COUNT] = [
    Rule { kind: FaultKind::WatchdogTimeout, threshold: 1, window_ms: 0, action: RecoveryAction::SystemReset },
    Rule { kind: FaultKind::Brownout, threshold: 2, window_ms: 60_000, action: RecoveryAction::LoadShed },
    Rule { kind: FaultKind::ResetLoop, threshold: 3, window_ms: 60_000, action: RecoveryAction::SafeMode },
    Rule { kind: FaultKind::SensorInvalid, threshold: 3, window_ms: 10_000, action: RecoveryAction::Isolate },
    Rule { kind: FaultKind::ActuatorFail, threshold: 2, window_ms: 5_000, action: RecoveryAction::Isolate },
    Rule { kind: FaultKind::BusError, threshold: 5, window_ms: 1_000, action: RecoveryAction::ResetSubsystem },
    Rule { kind: FaultKind::MemoryError, threshold: 1, window_ms: 0, action: RecoveryAction::SafeMode },
    Rule { kind: FaultKind::CommLoss, threshold: 10, window_ms: 60_000, action: RecoveryAction::Retry },
    Rule { kind: FaultKind::PowerCritical, threshold: 1, window_ms: 0, action: RecoveryAction::LoadShed },
    Rule { kind: FaultKind::ThermalLimit, threshold: 1, window_ms: 0, action: RecoveryAction::PayloadOff },
    Rule { kind: FaultKind::AttitudeLost, threshold: 1, window_ms: 0, action: RecoveryAction::SafeMode },
];

/// Rule for a fault kind
pub fn rule_for(kind: FaultKind) -> Rule {
    RULES[kind as usize]
}

/// Per-kind fault bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Fault kind this record tracks
    pub kind: FaultKind,
    /// Subsystem that last reported the fault
    pub subsystem: SubsystemId,
    /// Milliseconds of the last report
    pub timestamp_ms: u64,
    /// Monotonic occurrence count, saturating
    pub occurrence_count: u32,
    /// Fault currently active
    pub active: bool,
    /// Last recovery action executed for this kind
    pub last_action: RecoveryAction,
}

struct FdirState {
    records: [FaultRecord; FAULT_KIND_COUNT],
    isolated: [bool; SUBSYSTEM_COUNT],
}

/// The fault engine
pub struct FdirEngine {
    state: Mutex<FdirState>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    mode: Arc<ModeManager>,
    bsp: Arc<dyn Bsp>,
    boot: BootReport,
    persistent: Arc<Mutex<BootRecord>>,
}

impl std::fmt::Debug for FdirEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdirEngine").finish_non_exhaustive()
    }
}

impl FdirEngine {
    /// Create the engine with its collaborators injected
    pub fn new(
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
        mode: Arc<ModeManager>,
        bsp: Arc<dyn Bsp>,
        boot: BootReport,
        persistent: Arc<Mutex<BootRecord>>,
    ) -> Self {
        let records = FaultKind::ALL.map(|kind| FaultRecord {
            kind,
            subsystem: SubsystemId::Core,
            timestamp_ms: 0,
            occurrence_count: 0,
            active: false,
            last_action: RecoveryAction::None,
        });
        Self {
            state: Mutex::new(FdirState { records, isolated: [false; SUBSYSTEM_COUNT] }),
            clock,
            events,
            mode,
            bsp,
            boot,
            persistent,
        }
    }

    /// Record a fault occurrence
    pub fn report_fault(&self, kind: FaultKind, subsystem: SubsystemId) {
        let now = self.clock.now_ms();
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            let record = &mut state.records[kind as usize];
            record.subsystem = subsystem;
            record.timestamp_ms = now;
            record.occurrence_count = record.occurrence_count.saturating_add(1);
            record.active = true;
        }
        self.events.error(subsystem, kind as u16, "fault reported");
    }

    /// Mark a fault inactive; the occurrence count is retained
    pub fn clear_fault(&self, kind: FaultKind) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.records[kind as usize].active = false;
        }
    }

    /// Whether the fault is currently active
    pub fn is_fault_active(&self, kind: FaultKind) -> bool {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.records[kind as usize].active)
            .unwrap_or(false)
    }

    /// Occurrence count for a fault kind
    pub fn fault_count(&self, kind: FaultKind) -> u32 {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.records[kind as usize].occurrence_count)
            .unwrap_or(0)
    }

    /// Snapshot of the record for a fault kind
    pub fn fault_record(&self, kind: FaultKind) -> FaultRecord {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.records[kind as usize])
            .unwrap_or(FaultRecord {
                kind,
                subsystem: SubsystemId::Core,
                timestamp_ms: 0,
                occurrence_count: 0,
                active: false,
                last_action: RecoveryAction::None,
            })
    }

    /// Mark a subsystem isolated
    pub fn isolate_subsystem(&self, subsystem: SubsystemId) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.isolated[subsystem as usize] = true;
        }
        self.events.warning(subsystem, "subsystem isolated");
    }

    /// Clear a subsystem's isolation flag
    pub fn restore_subsystem(&self, subsystem: SubsystemId) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.isolated[subsystem as usize] = false;
        }
        self.events.info(subsystem, "subsystem restored");
    }

    /// Whether a subsystem is isolated
    pub fn is_isolated(&self, subsystem: SubsystemId) -> bool {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.isolated[subsystem as usize])
            .unwrap_or(false)
    }

    /// Number of currently active faults
    pub fn active_fault_count(&self) -> u32 {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.records.iter().filter(|record| record.active).count() as u32)
            .unwrap_or(0)
    }

    /// Whether the boot history indicates a watchdog reset loop
    pub fn reset_loop_detected(&self) -> bool {
        self.boot.cause == ResetCause::Watchdog && self.boot.boot_count >= RESET_LOOP_BOOTS
    }

    /// Force SAFE with an event trail, outside any rule
    pub fn force_safe_mode(&self, reason: &str) {
        self.events.critical(SubsystemId::Fdir, 0, reason);
        self.mode.force(SystemMode::Safe);
    }

    /// Periodic fault evaluation
    ///
    /// Detects reset loops, executes the mapped action for every active
    /// fault at or past its threshold, and runs the clear-counters path once
    /// the vehicle has been fault-free in NOMINAL long enough.
    pub fn periodic(&self) {
        if self.reset_loop_detected() {
            self.report_fault(FaultKind::ResetLoop, SubsystemId::Boot);
        }

        // Collect due actions under the lock, execute after releasing it:
        // action execution touches the mode manager and BSP.
        let mut due: heapless::Vec<(RecoveryAction, SubsystemId), FAULT_KIND_COUNT> =
            heapless::Vec::new();
        let mut any_active = false;
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            for record in state.records.iter_mut() {
                if !record.active {
                    continue;
                }
                any_active = true;
                let rule = rule_for(record.kind);
                if record.occurrence_count >= rule.threshold {
                    record.last_action = rule.action;
                    let _ = due.push((rule.action, record.subsystem));
                }
            }
        }

        for (action, subsystem) in due {
            self.execute_action(action, subsystem);
        }

        if !any_active {
            self.maybe_clear_reset_counters();
        }
    }

    /// Execute the rule-mapped recovery for a fault kind immediately
    pub fn execute_recovery(&self, kind: FaultKind) {
        let rule = rule_for(kind);
        let subsystem = self.fault_record(kind).subsystem;
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.records[kind as usize].last_action = rule.action;
        }
        self.execute_action(rule.action, subsystem);
    }

    fn execute_action(&self, action: RecoveryAction, subsystem: SubsystemId) {
        match action {
            RecoveryAction::None | RecoveryAction::Retry => {}
            RecoveryAction::Isolate => self.isolate_subsystem(subsystem),
            RecoveryAction::ResetSubsystem => {
                self.events.warning(subsystem, "subsystem reset");
                self.bsp.reset_subsystem(subsystem);
            }
            RecoveryAction::SafeMode => {
                self.force_safe_mode("fault threshold: safe mode");
            }
            RecoveryAction::SystemReset => {
                self.events.critical(SubsystemId::Fdir, 0, "system reset");
                self.bsp.reset_software();
            }
            RecoveryAction::PayloadOff => {
                self.events.warning(SubsystemId::Payload, "payload rail off");
                self.bsp.power_disable_rail(PowerRail::Payload);
            }
            RecoveryAction::LoadShed => {
                self.events.warning(SubsystemId::Eps, "load shed");
                self.bsp.power_disable_rail(PowerRail::Actuators12v);
                self.bsp.power_disable_rail(PowerRail::Payload);
            }
        }
    }

    fn maybe_clear_reset_counters(&self) {
        if self.mode.current() != SystemMode::Nominal
            || self.mode.time_in_mode_s() < NOMINAL_STABLE_SECS
        {
            return;
        }
        let cleared = match self.persistent.lock(Timeout::Forever) {
            Ok(mut record) => {
                if record.reset_count_watchdog == 0 && record.reset_count_brownout == 0 {
                    false
                } else {
                    record.clear_reset_counters();
                    true
                }
            }
            Err(_) => false,
        };
        if cleared {
            self.events.info(SubsystemId::Fdir, "reset counters cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osal::SimClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingBsp {
        software_resets: AtomicUsize,
        subsystem_resets: AtomicUsize,
        rails_disabled: AtomicUsize,
    }

    impl Bsp for RecordingBsp {
        fn clock_basic_init(&self) {}
        fn watchdog_init(&self) {}
        fn watchdog_kick(&self) {}
        fn watchdog_set_timeout(&self, _timeout_ms: u32) {}
        fn reset_get_cause(&self) -> ResetCause {
            ResetCause::Unknown
        }
        fn reset_software(&self) {
            self.software_resets.fetch_add(1, Ordering::SeqCst);
        }
        fn reset_subsystem(&self, _subsystem: SubsystemId) {
            self.subsystem_resets.fetch_add(1, Ordering::SeqCst);
        }
        fn safe_mode_pin_asserted(&self) -> bool {
            false
        }
        fn power_enter_low_power(&self) {}
        fn power_enable_rail(&self, _rail: PowerRail) {}
        fn power_disable_rail(&self, _rail: PowerRail) {
            self.rails_disabled.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        clock: Arc<SimClock>,
        mode: Arc<ModeManager>,
        bsp: Arc<RecordingBsp>,
        persistent: Arc<Mutex<BootRecord>>,
        engine: FdirEngine,
    }

    fn fixture(boot: BootReport) -> Fixture {
        let clock = Arc::new(SimClock::new());
        let events = Arc::new(EventLog::new(clock.clone()));
        let mode = Arc::new(ModeManager::new(boot.mode, clock.clone()));
        let bsp = Arc::new(RecordingBsp::default());
        let persistent = Arc::new(Mutex::new(BootRecord::reinitialized()));
        let engine = FdirEngine::new(
            clock.clone(),
            events,
            mode.clone(),
            bsp.clone(),
            boot,
            persistent.clone(),
        );
        Fixture { clock, mode, bsp, persistent, engine }
    }

    fn quiet_boot() -> BootReport {
        BootReport {
            cause: ResetCause::PowerOn,
            mode: SystemMode::Nominal,
            boot_count: 1,
            watchdog_resets: 0,
        }
    }

    #[test]
    fn report_stamps_and_counts() {
        let f = fixture(quiet_boot());
        f.clock.advance(500);
        f.engine.report_fault(FaultKind::BusError, SubsystemId::Adcs);
        f.engine.report_fault(FaultKind::BusError, SubsystemId::Adcs);

        let record = f.engine.fault_record(FaultKind::BusError);
        assert!(record.active);
        assert_eq!(record.occurrence_count, 2);
        assert_eq!(record.subsystem, SubsystemId::Adcs);
        assert_eq!(record.timestamp_ms, 500);
    }

    #[test]
    fn below_threshold_no_action() {
        let f = fixture(quiet_boot());
        for _ in 0..4 {
            f.engine.report_fault(FaultKind::BusError, SubsystemId::Adcs);
        }
        f.engine.periodic();
        assert_eq!(f.bsp.subsystem_resets.load(Ordering::SeqCst), 0);
        assert_eq!(
            f.engine.fault_record(FaultKind::BusError).last_action,
            RecoveryAction::None
        );
    }

    #[test]
    fn threshold_triggers_mapped_action() {
        let f = fixture(quiet_boot());
        for _ in 0..5 {
            f.engine.report_fault(FaultKind::BusError, SubsystemId::Adcs);
        }
        f.engine.periodic();
        assert_eq!(f.bsp.subsystem_resets.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.engine.fault_record(FaultKind::BusError).last_action,
            RecoveryAction::ResetSubsystem
        );
    }

    #[test]
    fn memory_error_forces_safe_mode() {
        let f = fixture(quiet_boot());
        f.engine.report_fault(FaultKind::MemoryError, SubsystemId::Core);
        f.engine.periodic();
        f.mode.process();
        assert_eq!(f.mode.current(), SystemMode::Safe);
    }

    #[test]
    fn watchdog_timeout_requests_system_reset() {
        let f = fixture(quiet_boot());
        f.engine.report_fault(FaultKind::WatchdogTimeout, SubsystemId::Rtos);
        f.engine.periodic();
        assert_eq!(f.bsp.software_resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn isolation_flags_are_settable_and_clearable() {
        let f = fixture(quiet_boot());
        for _ in 0..3 {
            f.engine.report_fault(FaultKind::SensorInvalid, SubsystemId::Adcs);
        }
        f.engine.periodic();
        assert!(f.engine.is_isolated(SubsystemId::Adcs));
        f.engine.restore_subsystem(SubsystemId::Adcs);
        assert!(!f.engine.is_isolated(SubsystemId::Adcs));
    }

    #[test]
    fn reset_loop_reported_from_boot_history() {
        let f = fixture(BootReport {
            cause: ResetCause::Watchdog,
            mode: SystemMode::Safe,
            boot_count: 3,
            watchdog_resets: 3,
        });
        assert!(f.engine.reset_loop_detected());
        f.engine.periodic();
        assert!(f.engine.is_fault_active(FaultKind::ResetLoop));
        assert_eq!(f.engine.fault_count(FaultKind::ResetLoop), 1);
    }

    #[test]
    fn load_shed_drops_two_rails() {
        let f = fixture(quiet_boot());
        f.engine.report_fault(FaultKind::PowerCritical, SubsystemId::Eps);
        f.engine.periodic();
        assert_eq!(f.bsp.rails_disabled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn counters_clear_after_stable_nominal() {
        let f = fixture(quiet_boot());
        {
            let mut record = f.persistent.lock(Timeout::Forever).expect("lock");
            record.reset_count_watchdog = 2;
            record.seal();
        }

        f.engine.periodic();
        {
            let record = f.persistent.lock(Timeout::Forever).expect("lock");
            assert_eq!(record.reset_count_watchdog, 2);
        }

        f.clock.advance(u64::from(NOMINAL_STABLE_SECS) * 1000);
        f.engine.periodic();
        let record = f.persistent.lock(Timeout::Forever).expect("lock");
        assert_eq!(record.reset_count_watchdog, 0);
        assert!(record.is_valid());
    }

    #[test]
    fn clear_fault_keeps_count() {
        let f = fixture(quiet_boot());
        f.engine.report_fault(FaultKind::CommLoss, SubsystemId::Comms);
        f.engine.clear_fault(FaultKind::CommLoss);
        assert!(!f.engine.is_fault_active(FaultKind::CommLoss));
        assert_eq!(f.engine.fault_count(FaultKind::CommLoss), 1);
    }
}
