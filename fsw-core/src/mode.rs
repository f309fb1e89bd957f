//! System mode manager
//!
//! A small FSM over the six operating modes. Transitions are validated
//! against a static table; FDIR bypasses the table through [`ModeManager::force`].
//! Transitions are armed by `request`/`force` and committed by the periodic
//! `process` call, which also enforces per-mode dwell timeouts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FswError, Result};
use crate::osal::{Clock, Mutex, Timeout};
use crate::types::SystemMode;

/// Maximum dwell in DETUMBLE before SAFE is forced (30 minutes)
pub const DETUMBLE_TIMEOUT_S: u32 = 1800;

/// Maximum dwell in RECOVERY before SAFE is forced (1 hour)
pub const RECOVERY_TIMEOUT_S: u32 = 3600;

/// Allowed (from, to) transitions; any pair not listed is rejected
const TRANSITIONS: &[(SystemMode, SystemMode)] = &[
    // BOOT: anywhere except directly to NOMINAL
    (SystemMode::Boot, SystemMode::Safe),
    (SystemMode::Boot, SystemMode::Detumble),
    (SystemMode::Boot, SystemMode::Recovery),
    (SystemMode::Boot, SystemMode::LowPower),
    // SAFE: exits only by ground command or power recovery
    (SystemMode::Safe, SystemMode::Detumble),
    (SystemMode::Safe, SystemMode::Nominal),
    (SystemMode::Safe, SystemMode::LowPower),
    // DETUMBLE
    (SystemMode::Detumble, SystemMode::Safe),
    (SystemMode::Detumble, SystemMode::Nominal),
    (SystemMode::Detumble, SystemMode::LowPower),
    // NOMINAL
    (SystemMode::Nominal, SystemMode::Safe),
    (SystemMode::Nominal, SystemMode::Detumble),
    (SystemMode::Nominal, SystemMode::LowPower),
    (SystemMode::Nominal, SystemMode::Recovery),
    // LOW_POWER
    (SystemMode::LowPower, SystemMode::Safe),
    (SystemMode::LowPower, SystemMode::Nominal),
    (SystemMode::LowPower, SystemMode::Detumble),
    // RECOVERY
    (SystemMode::Recovery, SystemMode::Safe),
    (SystemMode::Recovery, SystemMode::Nominal),
    (SystemMode::Recovery, SystemMode::Detumble),
];

/// Entry/exit hook; invoked while the mode mutex is held, must not block
pub type ModeHook = fn(SystemMode);

/// A committed mode transition, reported by [`ModeManager::process`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Mode exited
    pub from: SystemMode,
    /// Mode entered
    pub to: SystemMode,
    /// The transition bypassed the table (FDIR or timeout)
    pub forced: bool,
}

fn timeout_for(mode: SystemMode) -> u32 {
    match mode {
        SystemMode::Detumble => DETUMBLE_TIMEOUT_S,
        SystemMode::Recovery => RECOVERY_TIMEOUT_S,
        _ => 0,
    }
}

struct ModeState {
    current: SystemMode,
    previous: SystemMode,
    requested: SystemMode,
    entry_time_s: u32,
    timeout_s: u32,
    transition_pending: bool,
    forced_override: bool,
    entry_hook: Option<ModeHook>,
    exit_hook: Option<ModeHook>,
}

/// Owner of the vehicle mode state
pub struct ModeManager {
    state: Mutex<ModeState>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ModeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeManager").field("current", &self.current()).finish()
    }
}

impl ModeManager {
    /// Initialize with the boot-selected mode; `previous` starts at BOOT
    pub fn new(initial: SystemMode, clock: Arc<dyn Clock>) -> Self {
        let entry_time_s = clock.now_seconds();
        Self {
            state: Mutex::new(ModeState {
                current: initial,
                previous: SystemMode::Boot,
                requested: initial,
                entry_time_s,
                timeout_s: timeout_for(initial),
                transition_pending: false,
                forced_override: false,
                entry_hook: None,
                exit_hook: None,
            }),
            clock,
        }
    }

    /// Whether the static table allows `from -> to`
    pub fn can_transition(from: SystemMode, to: SystemMode) -> bool {
        if from == to {
            return false;
        }
        TRANSITIONS.iter().any(|&(f, t)| f == from && t == to)
    }

    /// Request a transition through the table
    ///
    /// Arms a pending transition committed by the next [`process`](Self::process).
    /// Fails with `PermissionDenied` and leaves the state untouched if the
    /// pair is not allowed.
    pub fn request(&self, mode: SystemMode) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        if !Self::can_transition(state.current, mode) {
            return Err(FswError::PermissionDenied);
        }
        state.requested = mode;
        state.transition_pending = true;
        state.forced_override = false;
        Ok(())
    }

    /// Arm a transition bypassing the table (FDIR path)
    pub fn force(&self, mode: SystemMode) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.requested = mode;
            state.transition_pending = true;
            state.forced_override = true;
        }
    }

    /// Commit a pending transition and police the dwell timeout
    ///
    /// Called periodically by the scheduler. If the current mode has
    /// exceeded its timeout, SAFE is forced first. Returns the transition
    /// that was committed, if any.
    pub fn process(&self) -> Option<Transition> {
        let now_s = self.clock.now_seconds();
        let mut state = self.state.lock(Timeout::Forever).ok()?;

        if state.timeout_s > 0 && now_s.saturating_sub(state.entry_time_s) >= state.timeout_s {
            state.requested = SystemMode::Safe;
            state.transition_pending = true;
            state.forced_override = true;
        }

        if !state.transition_pending {
            return None;
        }

        let forced = state.forced_override;
        if let Some(exit) = state.exit_hook {
            exit(state.current);
        }

        state.previous = state.current;
        state.current = state.requested;
        state.entry_time_s = now_s;
        state.timeout_s = timeout_for(state.current);
        state.transition_pending = false;
        state.forced_override = false;

        if let Some(entry) = state.entry_hook {
            entry(state.current);
        }

        Some(Transition { from: state.previous, to: state.current, forced })
    }

    /// Current mode
    pub fn current(&self) -> SystemMode {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.current)
            .unwrap_or(SystemMode::Safe)
    }

    /// Mode before the last committed transition
    pub fn previous(&self) -> SystemMode {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.previous)
            .unwrap_or(SystemMode::Boot)
    }

    /// Seconds spent in the current mode
    pub fn time_in_mode_s(&self) -> u32 {
        let now_s = self.clock.now_seconds();
        self.state
            .lock(Timeout::Forever)
            .map(|state| now_s.saturating_sub(state.entry_time_s))
            .unwrap_or(0)
    }

    /// Whether the current mode has exceeded its dwell timeout
    pub fn is_timed_out(&self) -> bool {
        let now_s = self.clock.now_seconds();
        self.state
            .lock(Timeout::Forever)
            .map(|state| {
                state.timeout_s > 0
                    && now_s.saturating_sub(state.entry_time_s) >= state.timeout_s
            })
            .unwrap_or(false)
    }

    /// Install the entry hook, replacing any existing one
    pub fn set_entry_hook(&self, hook: ModeHook) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.entry_hook = Some(hook);
        }
    }

    /// Install the exit hook, replacing any existing one
    pub fn set_exit_hook(&self, hook: ModeHook) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.exit_hook = Some(hook);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osal::SimClock;
    use crate::types::MODE_COUNT;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(initial: SystemMode) -> (Arc<SimClock>, ModeManager) {
        let clock = Arc::new(SimClock::new());
        let mode = ModeManager::new(initial, clock.clone());
        (clock, mode)
    }

    #[test]
    fn init_state() {
        let (_clock, mode) = manager(SystemMode::Detumble);
        assert_eq!(mode.current(), SystemMode::Detumble);
        assert_eq!(mode.previous(), SystemMode::Boot);
        assert_eq!(mode.time_in_mode_s(), 0);
        assert!(!mode.is_timed_out());
    }

    #[test]
    fn legal_request_commits_on_process() {
        let (_clock, mode) = manager(SystemMode::Safe);
        mode.request(SystemMode::Nominal).expect("legal request");
        // Not committed until process runs.
        assert_eq!(mode.current(), SystemMode::Safe);

        let transition = mode.process().expect("transition");
        assert_eq!(transition.from, SystemMode::Safe);
        assert_eq!(transition.to, SystemMode::Nominal);
        assert!(!transition.forced);
        assert_eq!(mode.current(), SystemMode::Nominal);
        assert_eq!(mode.previous(), SystemMode::Safe);
    }

    #[test]
    fn illegal_request_is_rejected_without_side_effects() {
        let (_clock, mode) = manager(SystemMode::Boot);
        assert_eq!(mode.request(SystemMode::Nominal), Err(FswError::PermissionDenied));
        assert!(mode.process().is_none());
        assert_eq!(mode.current(), SystemMode::Boot);
    }

    #[test]
    fn every_disallowed_pair_is_rejected() {
        for from_raw in 0..MODE_COUNT as u8 {
            for to_raw in 0..MODE_COUNT as u8 {
                let from = SystemMode::from_u8(from_raw).expect("mode");
                let to = SystemMode::from_u8(to_raw).expect("mode");
                if ModeManager::can_transition(from, to) {
                    continue;
                }
                let (_clock, mode) = manager(from);
                assert_eq!(mode.request(to), Err(FswError::PermissionDenied));
                assert_eq!(mode.current(), from);
            }
        }
    }

    #[test]
    fn self_transition_is_disallowed() {
        assert!(!ModeManager::can_transition(SystemMode::Safe, SystemMode::Safe));
    }

    #[test]
    fn force_bypasses_the_table() {
        let (_clock, mode) = manager(SystemMode::Boot);
        assert!(!ModeManager::can_transition(SystemMode::Boot, SystemMode::Nominal));
        mode.force(SystemMode::Nominal);
        let transition = mode.process().expect("forced transition");
        assert!(transition.forced);
        assert_eq!(mode.current(), SystemMode::Nominal);
    }

    #[test]
    fn detumble_timeout_forces_safe() {
        let (clock, mode) = manager(SystemMode::Detumble);
        clock.advance(u64::from(DETUMBLE_TIMEOUT_S) * 1000 - 1000);
        assert!(mode.process().is_none());
        assert!(!mode.is_timed_out());

        clock.advance(1000);
        assert!(mode.is_timed_out());
        let transition = mode.process().expect("timeout transition");
        assert_eq!(transition.to, SystemMode::Safe);
        assert!(transition.forced);
    }

    #[test]
    fn recovery_timeout_forces_safe() {
        let (clock, mode) = manager(SystemMode::Recovery);
        clock.advance(u64::from(RECOVERY_TIMEOUT_S) * 1000);
        let transition = mode.process().expect("timeout transition");
        assert_eq!(transition.to, SystemMode::Safe);
    }

    #[test]
    fn nominal_has_no_timeout() {
        let (clock, mode) = manager(SystemMode::Nominal);
        clock.advance(100 * 3600 * 1000);
        assert!(!mode.is_timed_out());
        assert!(mode.process().is_none());
    }

    static ENTRIES: AtomicU32 = AtomicU32::new(0);
    static EXITS: AtomicU32 = AtomicU32::new(0);

    fn count_entry(_mode: SystemMode) {
        ENTRIES.fetch_add(1, Ordering::SeqCst);
    }

    fn count_exit(_mode: SystemMode) {
        EXITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn hooks_fire_on_commit() {
        let (_clock, mode) = manager(SystemMode::Safe);
        mode.set_entry_hook(count_entry);
        mode.set_exit_hook(count_exit);

        let entries_before = ENTRIES.load(Ordering::SeqCst);
        let exits_before = EXITS.load(Ordering::SeqCst);

        mode.request(SystemMode::Nominal).expect("request");
        mode.process().expect("transition");

        assert_eq!(ENTRIES.load(Ordering::SeqCst), entries_before + 1);
        assert_eq!(EXITS.load(Ordering::SeqCst), exits_before + 1);
    }

    #[test]
    fn current_tracks_the_latest_legal_request() {
        let (_clock, mode) = manager(SystemMode::Safe);
        mode.request(SystemMode::Detumble).expect("request");
        mode.request(SystemMode::Nominal).expect("request replaces pending");
        mode.process().expect("transition");
        assert_eq!(mode.current(), SystemMode::Nominal);
        assert_eq!(mode.previous(), SystemMode::Safe);
    }
}
