//! Common data types for the flight core
//!
//! Fundamental enumerations shared by every subsystem: reset causes, system
//! modes, subsystem identifiers and event severities, plus the APID and PUS
//! service assignments used on the space link.

use serde::{Deserialize, Serialize};

/// Cause of the most recent reset, as reported by the reset controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResetCause {
    /// Cause could not be determined
    Unknown = 0,
    /// Cold start from an unpowered state
    PowerOn = 1,
    /// External reset pin
    Pin = 2,
    /// Independent watchdog expired
    Watchdog = 3,
    /// Software-commanded reset
    Software = 4,
    /// Supply dipped below the brown-out threshold
    BrownOut = 5,
    /// Wake from a low-power state
    LowPower = 6,
}

impl ResetCause {
    /// Decode from the persisted representation; unrecognized values map to
    /// `Unknown` so a corrupted record can never produce an invalid cause.
    pub const fn from_u32(raw: u32) -> Self {
        match raw {
            1 => ResetCause::PowerOn,
            2 => ResetCause::Pin,
            3 => ResetCause::Watchdog,
            4 => ResetCause::Software,
            5 => ResetCause::BrownOut,
            6 => ResetCause::LowPower,
            _ => ResetCause::Unknown,
        }
    }
}

/// Operational modes of the vehicle
///
/// The ordinal values are part of the command interface: the mode-change
/// telecommand carries them on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SystemMode {
    /// Startup, before the first transition
    Boot = 0,
    /// Minimal power-preserving configuration with a restricted command set
    Safe = 1,
    /// Post-deployment angular-rate reduction
    Detumble = 2,
    /// Full mission operations
    Nominal = 3,
    /// Reduced consumption while the battery recovers
    LowPower = 4,
    /// Diagnosis after an unexpected reset
    Recovery = 5,
}

/// Number of system modes
pub const MODE_COUNT: usize = 6;

impl SystemMode {
    /// Decode a wire ordinal
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SystemMode::Boot),
            1 => Some(SystemMode::Safe),
            2 => Some(SystemMode::Detumble),
            3 => Some(SystemMode::Nominal),
            4 => Some(SystemMode::LowPower),
            5 => Some(SystemMode::Recovery),
            _ => None,
        }
    }

    /// Human-readable mode name for logs and ground displays
    pub const fn name(&self) -> &'static str {
        match self {
            SystemMode::Boot => "BOOT",
            SystemMode::Safe => "SAFE",
            SystemMode::Detumble => "DETUMBLE",
            SystemMode::Nominal => "NOMINAL",
            SystemMode::LowPower => "LOW_POWER",
            SystemMode::Recovery => "RECOVERY",
        }
    }
}

/// On-board subsystems, used for fault attribution and event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum SubsystemId {
    Boot = 0,
    Rtos,
    Core,
    Mode,
    Health,
    Fdir,
    Eps,
    Adcs,
    Comms,
    Payload,
    Data,
    Time,
    Drivers,
}

/// Number of subsystems
pub const SUBSYSTEM_COUNT: usize = 13;

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    /// Developer diagnostics
    Debug = 0,
    /// Normal operational milestones
    Info = 1,
    /// Degraded but functional
    Warning = 2,
    /// A fault occurred
    Error = 3,
    /// Mission-threatening condition
    Critical = 4,
}

/// Application Process Identifiers assigned to this mission
///
/// APIDs are 11-bit routing fields; the assignments below match the ground
/// segment database.
#[allow(missing_docs)]
pub mod apid {
    pub const IDLE: u16 = 0;
    pub const SYSTEM: u16 = 1;
    pub const HEALTH: u16 = 2;
    pub const POWER: u16 = 3;
    pub const ADCS: u16 = 4;
    pub const COMMS: u16 = 5;
    pub const PAYLOAD: u16 = 6;
    pub const TIME: u16 = 7;
    pub const FDIR: u16 = 8;
    pub const FILE: u16 = 9;

    /// Highest valid APID (11 bits)
    pub const MAX: u16 = 2047;
}

/// PUS service types (ECSS-E-ST-70-41C) used by this mission
#[allow(missing_docs)]
pub mod pus {
    pub const REQUEST_VERIFICATION: u8 = 1;
    pub const HOUSEKEEPING: u8 = 3;
    pub const EVENT_REPORTING: u8 = 5;
    pub const FUNCTION_MGMT: u8 = 8;
    pub const TIME_MGMT: u8 = 9;
    pub const TEST: u8 = 17;
}
