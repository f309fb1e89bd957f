//! Boot sequencing and persistent reset history
//!
//! The boot record lives in a memory region that survives warm resets (on
//! the flight target a `.noinit` backup-RAM section; hosted runs keep it in
//! the simulator). It is the only state that lets the vehicle reason about
//! why it keeps rebooting. The sequencer validates the record, folds in the
//! new reset cause and picks the initial operating mode.
//!
//! Copying the initialized-data image and zeroing `.bss` happen before any
//! of this code runs; that step belongs to the target runtime.

use serde::{Deserialize, Serialize};

use crate::bsp::Bsp;
use crate::types::{ResetCause, SystemMode};

/// Integrity sentinel for the persistent record
pub const BOOT_RECORD_MAGIC: u32 = 0xB007_C0DE;

/// Consecutive watchdog resets before boot forces SAFE
pub const BOOT_SAFE_THRESHOLD: u32 = 3;

/// Serialized size of the persistent record in bytes
pub const BOOT_RECORD_SIZE: usize = 32;

const CHECKSUM_SEED: u32 = 0xDEAD_BEEF;
const CHECKSUM_OFFSET: usize = 28;

/// Reset-surviving boot record
///
/// Mutated only by the boot sequencer during reset handling and by FDIR's
/// clear-counters path. Everybody else reads a [`BootReport`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRecord {
    /// Must equal [`BOOT_RECORD_MAGIC`]
    pub magic: u32,
    /// Total boots since the record was last reinitialized, saturating
    pub boot_count: u32,
    /// Consecutive watchdog-caused resets, saturating
    pub reset_count_watchdog: u32,
    /// Brown-out resets, saturating
    pub reset_count_brownout: u32,
    /// Software-commanded resets, saturating
    pub reset_count_software: u32,
    /// Cause of the most recent reset
    pub last_reset_cause: ResetCause,
    /// Mode requested for the next software reset
    pub requested_mode: SystemMode,
    /// `sum(bytes[0..28]) XOR 0xDEADBEEF` over the serialized record
    pub checksum: u32,
}

impl BootRecord {
    /// A freshly zeroed record with a valid checksum
    pub fn reinitialized() -> Self {
        let mut record = Self {
            magic: BOOT_RECORD_MAGIC,
            boot_count: 0,
            reset_count_watchdog: 0,
            reset_count_brownout: 0,
            reset_count_software: 0,
            last_reset_cause: ResetCause::Unknown,
            requested_mode: SystemMode::Boot,
            checksum: 0,
        };
        record.seal();
        record
    }

    /// Serialize to the packed little-endian layout
    pub fn to_bytes(&self) -> [u8; BOOT_RECORD_SIZE] {
        let mut bytes = [0u8; BOOT_RECORD_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.boot_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.reset_count_watchdog.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.reset_count_brownout.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.reset_count_software.to_le_bytes());
        bytes[20..24].copy_from_slice(&(self.last_reset_cause as u32).to_le_bytes());
        bytes[24..28].copy_from_slice(&(self.requested_mode as u32).to_le_bytes());
        bytes[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize from the packed layout; unknown cause and mode values
    /// decode leniently and fail the subsequent validity check instead
    pub fn from_bytes(bytes: &[u8; BOOT_RECORD_SIZE]) -> Self {
        let word = |offset: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_le_bytes(raw)
        };
        Self {
            magic: word(0),
            boot_count: word(4),
            reset_count_watchdog: word(8),
            reset_count_brownout: word(12),
            reset_count_software: word(16),
            last_reset_cause: ResetCause::from_u32(word(20)),
            requested_mode: SystemMode::from_u8(word(24) as u8).unwrap_or(SystemMode::Boot),
            checksum: word(28),
        }
    }

    /// Checksum over everything preceding the checksum field
    pub fn compute_checksum(&self) -> u32 {
        let bytes = self.to_bytes();
        let sum: u32 = bytes[..CHECKSUM_OFFSET]
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
        sum ^ CHECKSUM_SEED
    }

    /// Recompute and store the checksum
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Magic and checksum both intact
    pub fn is_valid(&self) -> bool {
        self.magic == BOOT_RECORD_MAGIC && self.checksum == self.compute_checksum()
    }

    /// Reset-loop history says the next boot must be SAFE
    pub fn is_safe_required(&self) -> bool {
        self.reset_count_watchdog >= BOOT_SAFE_THRESHOLD
            || self.last_reset_cause == ResetCause::BrownOut
    }

    /// Clear the watchdog and brown-out counters (FDIR clear-counters path)
    pub fn clear_reset_counters(&mut self) {
        self.reset_count_watchdog = 0;
        self.reset_count_brownout = 0;
        self.seal();
    }

    /// Record the mode to enter after the next software reset
    pub fn set_requested_mode(&mut self, mode: SystemMode) {
        self.requested_mode = mode;
        self.seal();
    }
}

/// Immutable summary of one boot, produced by [`run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootReport {
    /// Reset cause read from the platform
    pub cause: ResetCause,
    /// Initial operating mode selected for this boot
    pub mode: SystemMode,
    /// Boot count after increment
    pub boot_count: u32,
    /// Watchdog reset count after cause handling
    pub watchdog_resets: u32,
}

/// Mode selection rules, evaluated top to bottom; mutates the reset
/// counters for the watchdog and brown-out arms
fn select_mode(record: &mut BootRecord, cause: ResetCause, bsp: &dyn Bsp) -> SystemMode {
    if bsp.safe_mode_pin_asserted() {
        return SystemMode::Safe;
    }
    if record.is_safe_required() {
        return SystemMode::Safe;
    }

    match cause {
        ResetCause::Watchdog => {
            record.reset_count_watchdog = record.reset_count_watchdog.saturating_add(1);
            if record.reset_count_watchdog >= BOOT_SAFE_THRESHOLD {
                SystemMode::Safe
            } else {
                SystemMode::Recovery
            }
        }
        ResetCause::BrownOut => {
            record.reset_count_brownout = record.reset_count_brownout.saturating_add(1);
            SystemMode::LowPower
        }
        ResetCause::PowerOn => SystemMode::Detumble,
        ResetCause::Software => {
            if record.requested_mode != SystemMode::Boot {
                record.requested_mode
            } else {
                SystemMode::Nominal
            }
        }
        _ => SystemMode::Safe,
    }
}

/// Run the boot sequence against the persistent record
///
/// Validates (and if necessary reinitializes) the record, performs platform
/// early-init, folds the reset cause into the history and selects the
/// initial mode. The record is sealed before returning; the caller hands the
/// report to the service wiring and starts the scheduler.
pub fn run(record: &mut BootRecord, bsp: &dyn Bsp) -> BootReport {
    if !record.is_valid() {
        log::warn!("persistent boot record invalid, reinitializing");
        *record = BootRecord::reinitialized();
    }

    bsp.clock_basic_init();
    bsp.watchdog_init();

    let cause = bsp.reset_get_cause();
    record.last_reset_cause = cause;
    record.boot_count = record.boot_count.saturating_add(1);

    let mode = select_mode(record, cause, bsp);
    record.seal();

    log::info!(
        "boot {} cause {:?} -> mode {}",
        record.boot_count,
        cause,
        mode.name()
    );

    BootReport {
        cause,
        mode,
        boot_count: record.boot_count,
        watchdog_resets: record.reset_count_watchdog,
    }
}
