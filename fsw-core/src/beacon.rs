//! Health beacon
//!
//! A fixed 46-byte frame broadcast on the UHF downlink so any ground
//! station — including amateurs decoding the callsign — can judge vehicle
//! health without a full CCSDS stack. Fields are little-endian; the trailer
//! is the same CRC-16-CCITT the packet codec uses. The transmit sink is
//! injected; without one the frame is built and counted but goes nowhere.

use std::sync::Arc;

use crate::ccsds::crc16;
use crate::fdir::FdirEngine;
use crate::osal::{Mutex, Timeout};
use crate::telemetry::TmSources;
use crate::types::SystemMode;

/// Serialized beacon frame size in bytes
pub const BEACON_FRAME_SIZE: usize = 46;

/// Callsign field size in bytes
pub const BEACON_CALLSIGN_SIZE: usize = 8;

/// Beacon interval in NOMINAL and most other modes (30 s)
pub const BEACON_NORMAL_INTERVAL_MS: u32 = 30_000;

/// Beacon interval while in SAFE (10 s)
pub const BEACON_SAFE_INTERVAL_MS: u32 = 10_000;

/// Beacon interval while in RECOVERY (5 s)
pub const BEACON_RECOVERY_INTERVAL_MS: u32 = 5_000;

/// Lower clamp for a configured interval (1 s)
pub const BEACON_MIN_INTERVAL_MS: u32 = 1_000;

/// Upper clamp for a configured interval (5 min)
pub const BEACON_MAX_INTERVAL_MS: u32 = 300_000;

/// Frame type byte: periodic health frame
pub const BEACON_TYPE_HEALTH: u8 = 0;

/// Current frame layout version
pub const BEACON_FRAME_VERSION: u8 = 1;

/// One decoded health beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    /// ASCII callsign, space padded
    pub callsign: [u8; BEACON_CALLSIGN_SIZE],
    /// Frame type
    pub frame_type: u8,
    /// Layout version
    pub frame_version: u8,
    /// Frame sequence number
    pub sequence: u16,
    /// Uptime in seconds
    pub uptime_s: u32,
    /// Current system mode ordinal
    pub mode: u8,
    /// Health monitor flag byte
    pub health_flags: u8,
    /// Boot count, saturated to a byte
    pub reset_count: u8,
    /// Number of active faults, saturated to a byte
    pub fault_flags: u8,
    /// Battery voltage in millivolts
    pub battery_voltage_mv: u16,
    /// Battery current in milliamps
    pub battery_current_ma: i16,
    /// Battery state of charge in percent
    pub battery_soc: u8,
    /// Battery temperature in degrees Celsius
    pub battery_temp_c: i8,
    /// Solar generation in milliwatts
    pub solar_power_mw: u16,
    /// Attitude quaternion (w, x, y, z) in Q15
    pub quaternion: [i16; 4],
    /// OBC temperature in degrees Celsius
    pub temp_obc_c: i8,
    /// Battery pack temperature in degrees Celsius
    pub temp_battery_c: i8,
    /// Transceiver temperature in degrees Celsius
    pub temp_comms_c: i8,
    /// Payload temperature in degrees Celsius
    pub temp_payload_c: i8,
    /// RSSI of the last received frame in dBm
    pub rssi_last: i8,
    /// Frames received in the last 24 hours
    pub packets_rx_24h: u8,
    /// Frames transmitted in the last 24 hours
    pub packets_tx_24h: u8,
    /// Estimated link margin in dB
    pub link_margin_db: u8,
    /// CRC-16-CCITT over the preceding 44 bytes
    pub crc16: u16,
}

impl BeaconFrame {
    /// Serialize little-endian; the CRC field must already be set
    pub fn to_bytes(&self) -> [u8; BEACON_FRAME_SIZE] {
        let mut bytes = [0u8; BEACON_FRAME_SIZE];
        bytes[0..8].copy_from_slice(&self.callsign);
        bytes[8] = self.frame_type;
        bytes[9] = self.frame_version;
        bytes[10..12].copy_from_slice(&self.sequence.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.uptime_s.to_le_bytes());
        bytes[16] = self.mode;
        bytes[17] = self.health_flags;
        bytes[18] = self.reset_count;
        bytes[19] = self.fault_flags;
        bytes[20..22].copy_from_slice(&self.battery_voltage_mv.to_le_bytes());
        bytes[22..24].copy_from_slice(&self.battery_current_ma.to_le_bytes());
        bytes[24] = self.battery_soc;
        bytes[25] = self.battery_temp_c as u8;
        bytes[26..28].copy_from_slice(&self.solar_power_mw.to_le_bytes());
        bytes[28..30].copy_from_slice(&self.quaternion[0].to_le_bytes());
        bytes[30..32].copy_from_slice(&self.quaternion[1].to_le_bytes());
        bytes[32..34].copy_from_slice(&self.quaternion[2].to_le_bytes());
        bytes[34..36].copy_from_slice(&self.quaternion[3].to_le_bytes());
        bytes[36] = self.temp_obc_c as u8;
        bytes[37] = self.temp_battery_c as u8;
        bytes[38] = self.temp_comms_c as u8;
        bytes[39] = self.temp_payload_c as u8;
        bytes[40] = self.rssi_last as u8;
        bytes[41] = self.packets_rx_24h;
        bytes[42] = self.packets_tx_24h;
        bytes[43] = self.link_margin_db;
        bytes[44..46].copy_from_slice(&self.crc16.to_le_bytes());
        bytes
    }

    /// CRC over the first 44 serialized bytes
    pub fn compute_crc(&self) -> u16 {
        let bytes = self.to_bytes();
        crc16(&bytes[..BEACON_FRAME_SIZE - 2])
    }
}

/// Transmit sink for serialized beacon frames (radio driver seam)
pub trait BeaconSink: Send + Sync {
    /// Hand one serialized frame to the radio
    fn transmit(&self, frame: &[u8; BEACON_FRAME_SIZE]);
}

struct BeaconState {
    callsign: [u8; BEACON_CALLSIGN_SIZE],
    interval_ms: u32,
    last_tx_ms: u64,
    tx_count: u32,
    sequence: u16,
    enabled: bool,
}

/// The beacon service
pub struct Beacon {
    state: Mutex<BeaconState>,
    sources: TmSources,
    fdir: Arc<FdirEngine>,
    sink: Option<Arc<dyn BeaconSink>>,
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon").field("tx_count", &self.tx_count()).finish()
    }
}

impl Beacon {
    /// Create the beacon with the default callsign and nominal interval
    pub fn new(
        callsign: &str,
        sources: TmSources,
        fdir: Arc<FdirEngine>,
        sink: Option<Arc<dyn BeaconSink>>,
    ) -> Self {
        let beacon = Self {
            state: Mutex::new(BeaconState {
                callsign: [b' '; BEACON_CALLSIGN_SIZE],
                interval_ms: BEACON_NORMAL_INTERVAL_MS,
                last_tx_ms: 0,
                tx_count: 0,
                sequence: 0,
                enabled: true,
            }),
            sources,
            fdir,
            sink,
        };
        beacon.set_callsign(callsign);
        beacon
    }

    /// Replace the callsign; longer strings are truncated, shorter ones
    /// space padded
    pub fn set_callsign(&self, callsign: &str) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.callsign = [b' '; BEACON_CALLSIGN_SIZE];
            for (slot, byte) in state.callsign.iter_mut().zip(callsign.bytes()) {
                *slot = byte;
            }
        }
    }

    /// Configure the nominal interval, clamped to [1 s, 300 s]
    pub fn set_interval(&self, interval_ms: u32) {
        let clamped = interval_ms.clamp(BEACON_MIN_INTERVAL_MS, BEACON_MAX_INTERVAL_MS);
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.interval_ms = clamped;
        }
    }

    /// Enable transmission
    pub fn enable(&self) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.enabled = true;
        }
    }

    /// Disable transmission
    pub fn disable(&self) {
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.enabled = false;
        }
    }

    /// Whether transmission is enabled
    pub fn is_enabled(&self) -> bool {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.enabled)
            .unwrap_or(false)
    }

    /// Frames transmitted since boot
    pub fn tx_count(&self) -> u32 {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.tx_count)
            .unwrap_or(0)
    }

    /// Uptime milliseconds of the last transmission
    pub fn last_tx_ms(&self) -> u64 {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.last_tx_ms)
            .unwrap_or(0)
    }

    /// Effective interval for the current mode
    pub fn effective_interval_ms(&self) -> u32 {
        match self.sources.mode.current() {
            SystemMode::Safe => BEACON_SAFE_INTERVAL_MS,
            SystemMode::Recovery => BEACON_RECOVERY_INTERVAL_MS,
            _ => self
                .state
                .lock(Timeout::Forever)
                .map(|state| state.interval_ms)
                .unwrap_or(BEACON_NORMAL_INTERVAL_MS),
        }
    }

    /// Periodic job: transmit when the mode-dependent interval has elapsed
    pub fn periodic(&self) {
        let now = self.sources.time.uptime_ms();
        let interval = self.effective_interval_ms();

        let due = self
            .state
            .lock(Timeout::Forever)
            .map(|state| state.enabled && now.saturating_sub(state.last_tx_ms) >= u64::from(interval))
            .unwrap_or(false);
        if !due {
            return;
        }

        self.transmit_now();
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.last_tx_ms = now;
        }
    }

    /// Assemble a frame from the current snapshots
    pub fn build_frame(&self) -> BeaconFrame {
        let (callsign, sequence) = match self.state.lock(Timeout::Forever) {
            Ok(mut state) => {
                let seq = state.sequence;
                state.sequence = state.sequence.wrapping_add(1);
                (state.callsign, seq)
            }
            Err(_) => ([b' '; BEACON_CALLSIGN_SIZE], 0),
        };

        let power = self.sources.power.power();
        let attitude = self.sources.attitude.attitude();
        let thermal = self.sources.thermal.thermal();
        let comms = self.sources.comms.comms();

        let mut frame = BeaconFrame {
            callsign,
            frame_type: BEACON_TYPE_HEALTH,
            frame_version: BEACON_FRAME_VERSION,
            sequence,
            uptime_s: self.sources.time.uptime_seconds(),
            mode: self.sources.mode.current() as u8,
            health_flags: self.sources.health.health_flags(),
            reset_count: self.sources.boot.boot_count.min(255) as u8,
            fault_flags: self.fdir.active_fault_count().min(255) as u8,
            battery_voltage_mv: power.battery_voltage_mv,
            battery_current_ma: power.battery_current_ma,
            battery_soc: power.battery_soc,
            battery_temp_c: power.battery_temp_c,
            solar_power_mw: power.solar_power_mw,
            quaternion: attitude.quaternion,
            temp_obc_c: thermal.obc_c,
            temp_battery_c: thermal.battery_c,
            temp_comms_c: thermal.comms_c,
            temp_payload_c: thermal.payload_c,
            rssi_last: comms.rssi_dbm,
            packets_rx_24h: comms.rx_24h,
            packets_tx_24h: comms.tx_24h,
            link_margin_db: comms.link_margin_db,
            crc16: 0,
        };
        frame.crc16 = frame.compute_crc();
        frame
    }

    /// Build and transmit one frame immediately
    pub fn transmit_now(&self) {
        let frame = self.build_frame();
        let bytes = frame.to_bytes();

        if let Some(sink) = &self.sink {
            sink.transmit(&bytes);
        }

        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            state.tx_count = state.tx_count.saturating_add(1);
        }
    }
}
