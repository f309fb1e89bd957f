//! Read-only subsystem snapshot accessors
//!
//! The power, attitude, thermal and radio subsystems live outside the core;
//! the core only consumes point-in-time snapshots through these traits when
//! it assembles housekeeping, beacons and power decisions. Implementations
//! must return without blocking.

use serde::{Deserialize, Serialize};

/// Battery and generation snapshot from the EPS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSnapshot {
    /// Battery terminal voltage in millivolts
    pub battery_voltage_mv: u16,
    /// Battery current in milliamps, positive while charging
    pub battery_current_ma: i16,
    /// State of charge in percent
    pub battery_soc: u8,
    /// Battery pack temperature in degrees Celsius
    pub battery_temp_c: i8,
    /// Total solar array output in milliwatts
    pub solar_power_mw: u16,
    /// Bitmask of energized rails, bit index = rail ordinal
    pub rail_status: u8,
    /// EPS has engaged its own low-power limiting
    pub low_power: bool,
    /// Battery below the hardware critical threshold
    pub critical: bool,
}

impl PowerSnapshot {
    /// A healthy flatline snapshot, used as the test default
    pub const fn nominal() -> Self {
        Self {
            battery_voltage_mv: 3700,
            battery_current_ma: 120,
            battery_soc: 80,
            battery_temp_c: 25,
            solar_power_mw: 1440,
            rail_status: 0x1F,
            low_power: false,
            critical: false,
        }
    }
}

/// Attitude snapshot from the ADCS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttitudeSnapshot {
    /// Attitude quaternion (w, x, y, z) in Q15 fixed point
    pub quaternion: [i16; 4],
    /// Body rates (x, y, z) in milliradians per second
    pub rates_mrad_s: [i16; 3],
    /// ADCS internal mode byte
    pub mode: u8,
    /// ADCS status byte
    pub status: u8,
    /// Pointing error in milliradians
    pub error_angle_mrad: i16,
}

impl AttitudeSnapshot {
    /// Identity attitude at rest
    pub const fn identity() -> Self {
        Self {
            quaternion: [i16::MAX, 0, 0, 0],
            rates_mrad_s: [0, 0, 0],
            mode: 0,
            status: 0,
            error_angle_mrad: 0,
        }
    }
}

/// Structure temperatures in degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermalSnapshot {
    /// On-board computer board
    pub obc_c: i8,
    /// Battery pack
    pub battery_c: i8,
    /// Transceiver board
    pub comms_c: i8,
    /// Payload bay
    pub payload_c: i8,
}

impl ThermalSnapshot {
    /// Room-temperature flatline
    pub const fn ambient() -> Self {
        Self { obc_c: 25, battery_c: 25, comms_c: 25, payload_c: 25 }
    }
}

/// Radio link statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommsSnapshot {
    /// RSSI of the last received frame in dBm
    pub rssi_dbm: i8,
    /// Frames received in the last 24 hours, saturating
    pub rx_24h: u8,
    /// Frames transmitted in the last 24 hours, saturating
    pub tx_24h: u8,
    /// Estimated downlink margin in dB
    pub link_margin_db: u8,
    /// Frames dropped for CRC errors
    pub crc_errors: u8,
}

/// Source of power snapshots
pub trait PowerProvider: Send + Sync {
    /// Current EPS snapshot
    fn power(&self) -> PowerSnapshot;
}

/// Source of attitude snapshots
pub trait AttitudeProvider: Send + Sync {
    /// Current ADCS snapshot
    fn attitude(&self) -> AttitudeSnapshot;
}

/// Source of thermal snapshots
pub trait ThermalProvider: Send + Sync {
    /// Current temperature set
    fn thermal(&self) -> ThermalSnapshot;
}

/// Source of radio statistics
pub trait CommsProvider: Send + Sync {
    /// Current link statistics
    fn comms(&self) -> CommsSnapshot;
}

/// Flatline provider returning constant healthy snapshots
///
/// Default wiring for tests and for boards where a subsystem is absent.
#[derive(Debug, Default)]
pub struct FlatlineProviders;

impl PowerProvider for FlatlineProviders {
    fn power(&self) -> PowerSnapshot {
        PowerSnapshot::nominal()
    }
}

impl AttitudeProvider for FlatlineProviders {
    fn attitude(&self) -> AttitudeSnapshot {
        AttitudeSnapshot::identity()
    }
}

impl ThermalProvider for FlatlineProviders {
    fn thermal(&self) -> ThermalSnapshot {
        ThermalSnapshot::ambient()
    }
}

impl CommsProvider for FlatlineProviders {
    fn comms(&self) -> CommsSnapshot {
        CommsSnapshot { rssi_dbm: -80, link_margin_db: 10, ..CommsSnapshot::default() }
    }
}
