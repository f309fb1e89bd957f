//! Telemetry pipeline
//!
//! A definition table drives periodic housekeeping generation; finished
//! packets go through a priority-preempting bounded queue that the downlink
//! transport drains. When the queue is full, a High or Critical packet may
//! displace one lower-priority packet; everything else is counted as an
//! overflow and dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boot::BootReport;
use crate::ccsds::{Codec, TmPacket};
use crate::error::{FswError, Result};
use crate::health::HealthMonitor;
use crate::mode::ModeManager;
use crate::osal::{Mutex, Timeout};
use crate::providers::{AttitudeProvider, CommsProvider, PowerProvider, ThermalProvider};
use crate::time::TimeService;
use crate::types::{apid, pus};

/// Maximum number of telemetry definitions
pub const TM_MAX_DEFINITIONS: usize = 32;

/// Downlink queue depth
pub const TM_QUEUE_SIZE: usize = 16;

/// Generator scratch buffer size in bytes
pub const TM_GEN_MAX: usize = 256;

/// Default housekeeping period in milliseconds
pub const TM_HK_DEFAULT_PERIOD_MS: u32 = 1000;

/// Minimum configurable housekeeping period in milliseconds
pub const TM_MIN_PERIOD_MS: u32 = 100;

/// Housekeeping report subtype on PUS service 3
pub const TM_HK_REPORT_SUBTYPE: u8 = 25;

/// Event report subtype on PUS service 5
pub const TM_EVENT_REPORT_SUBTYPE: u8 = 5;

/// Telemetry categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum TmType {
    Housekeeping,
    Event,
    Science,
    Diagnostic,
}

/// Downlink priority; higher values preempt lower ones in a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TmPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Read-only inputs available to housekeeping generators
#[derive(Clone)]
pub struct TmSources {
    /// Mode manager, for the current mode byte
    pub mode: Arc<ModeManager>,
    /// Time service, for uptime
    pub time: Arc<TimeService>,
    /// Health monitor, for flags and counters
    pub health: Arc<HealthMonitor>,
    /// EPS snapshots
    pub power: Arc<dyn PowerProvider>,
    /// ADCS snapshots
    pub attitude: Arc<dyn AttitudeProvider>,
    /// Temperature snapshots
    pub thermal: Arc<dyn ThermalProvider>,
    /// Radio statistics
    pub comms: Arc<dyn CommsProvider>,
    /// Boot summary, for boot count and reset cause
    pub boot: BootReport,
}

impl std::fmt::Debug for TmSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmSources").field("boot", &self.boot).finish_non_exhaustive()
    }
}

/// Housekeeping payload generator
pub type TmGenerator = fn(&TmSources, &mut heapless::Vec<u8, TM_GEN_MAX>);

/// One entry in the telemetry definition table
#[derive(Clone, Copy)]
pub struct TmDefinition {
    /// Local packet identifier used by enable/disable commands
    pub packet_id: u16,
    /// APID the packet is emitted under
    pub apid: u16,
    /// Category
    pub tm_type: TmType,
    /// Queue priority
    pub priority: TmPriority,
    /// Generation period in milliseconds
    pub period_ms: u32,
    /// Generation enabled
    pub enabled: bool,
    /// Payload generator
    pub generator: TmGenerator,
}

struct DefinitionSlot {
    def: TmDefinition,
    last_sent_ms: u64,
}

struct QueueSlot {
    packet: TmPacket,
    priority: TmPriority,
    stamp: u32,
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmStats {
    /// Housekeeping packets generated
    pub packets_generated: u32,
    /// Packets accepted into the queue
    pub packets_queued: u32,
    /// Packets handed to the transport
    pub packets_sent: u32,
    /// Enqueue attempts dropped on a full queue
    pub queue_overflows: u32,
}

struct TmState {
    definitions: heapless::Vec<DefinitionSlot, TM_MAX_DEFINITIONS>,
    queue: [Option<QueueSlot>; TM_QUEUE_SIZE],
    stamp_counter: u32,
    stats: TmStats,
}

/// The telemetry service
pub struct Telemetry {
    state: Mutex<TmState>,
    codec: Arc<Codec>,
    time: Arc<TimeService>,
    sources: TmSources,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").field("stats", &self.stats()).finish()
    }
}

impl Telemetry {
    /// Create the pipeline and register the standard housekeeping set
    pub fn new(codec: Arc<Codec>, time: Arc<TimeService>, sources: TmSources) -> Self {
        let telemetry = Self {
            state: Mutex::new(TmState {
                definitions: heapless::Vec::new(),
                queue: core::array::from_fn(|_| None),
                stamp_counter: 0,
                stats: TmStats::default(),
            }),
            codec,
            time,
            sources,
        };

        let standard: [(u16, u16, u32, TmGenerator); 4] = [
            (1, apid::SYSTEM, TM_HK_DEFAULT_PERIOD_MS, generators::system_hk),
            (2, apid::POWER, TM_HK_DEFAULT_PERIOD_MS, generators::power_hk),
            (3, apid::ADCS, TM_HK_DEFAULT_PERIOD_MS, generators::adcs_hk),
            (4, apid::COMMS, 5000, generators::comms_hk),
        ];
        for (packet_id, apid_value, period_ms, generator) in standard {
            let _ = telemetry.register(TmDefinition {
                packet_id,
                apid: apid_value,
                tm_type: TmType::Housekeeping,
                priority: TmPriority::Normal,
                period_ms,
                enabled: true,
                generator,
            });
        }
        telemetry
    }

    /// Register a telemetry definition
    pub fn register(&self, def: TmDefinition) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        if state.definitions.iter().any(|slot| slot.def.packet_id == def.packet_id) {
            return Err(FswError::Busy);
        }
        state
            .definitions
            .push(DefinitionSlot { def, last_sent_ms: 0 })
            .map_err(|_| FswError::NoMemory)?;
        Ok(())
    }

    /// Enable generation for a packet id
    pub fn enable(&self, packet_id: u16) -> Result<()> {
        self.set_enabled(packet_id, true)
    }

    /// Disable generation for a packet id
    pub fn disable(&self, packet_id: u16) -> Result<()> {
        self.set_enabled(packet_id, false)
    }

    fn set_enabled(&self, packet_id: u16, enabled: bool) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        let slot = state
            .definitions
            .iter_mut()
            .find(|slot| slot.def.packet_id == packet_id)
            .ok_or(FswError::NotFound)?;
        slot.def.enabled = enabled;
        Ok(())
    }

    /// Change the generation period for a packet id
    pub fn set_period(&self, packet_id: u16, period_ms: u32) -> Result<()> {
        if period_ms < TM_MIN_PERIOD_MS {
            return Err(FswError::InvalidParam);
        }
        let mut state = self.state.lock(Timeout::Forever)?;
        let slot = state
            .definitions
            .iter_mut()
            .find(|slot| slot.def.packet_id == packet_id)
            .ok_or(FswError::NotFound)?;
        slot.def.period_ms = period_ms;
        Ok(())
    }

    /// Whether generation is enabled for a packet id
    pub fn is_enabled(&self, packet_id: u16) -> bool {
        self.state
            .lock(Timeout::Forever)
            .ok()
            .and_then(|state| {
                state
                    .definitions
                    .iter()
                    .find(|slot| slot.def.packet_id == packet_id)
                    .map(|slot| slot.def.enabled)
            })
            .unwrap_or(false)
    }

    /// Generate every due housekeeping packet
    pub fn periodic(&self) {
        let now = self.time.uptime_ms();

        // Pick the due definitions under the lock, run the generators after
        // releasing it: generators read other components.
        let mut due: heapless::Vec<TmDefinition, TM_MAX_DEFINITIONS> = heapless::Vec::new();
        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            for slot in state.definitions.iter_mut() {
                if !slot.def.enabled || slot.def.tm_type != TmType::Housekeeping {
                    continue;
                }
                if now.saturating_sub(slot.last_sent_ms) >= u64::from(slot.def.period_ms) {
                    slot.last_sent_ms = now;
                    let _ = due.push(slot.def);
                }
            }
        }

        for def in due {
            let mut payload: heapless::Vec<u8, TM_GEN_MAX> = heapless::Vec::new();
            (def.generator)(&self.sources, &mut payload);
            if payload.is_empty() {
                continue;
            }

            let mut packet = self.codec.build_tm(def.apid, pus::HOUSEKEEPING, TM_HK_REPORT_SUBTYPE);
            if packet.set_data(&payload).is_err() {
                continue;
            }
            packet.finalize();

            if let Ok(mut state) = self.state.lock(Timeout::Forever) {
                state.stats.packets_generated = state.stats.packets_generated.saturating_add(1);
            }
            let _ = self.queue_packet(packet, def.priority);
        }
    }

    /// Enqueue a finished packet at the given priority
    ///
    /// A full queue accepts High/Critical packets by invalidating the first
    /// strictly-lower-priority entry and storing into its slot; lower
    /// priorities are dropped with the overflow counter incremented.
    pub fn queue_packet(&self, packet: TmPacket, priority: TmPriority) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        state.stamp_counter = state.stamp_counter.wrapping_add(1);
        let stamp = state.stamp_counter;

        let free = state.queue.iter().position(|slot| slot.is_none());
        let target = match free {
            Some(index) => Some(index),
            None if priority >= TmPriority::High => state
                .queue
                .iter()
                .position(|slot| slot.as_ref().is_some_and(|s| s.priority < priority)),
            None => None,
        };

        match target {
            Some(index) => {
                state.queue[index] = Some(QueueSlot { packet, priority, stamp });
                state.stats.packets_queued = state.stats.packets_queued.saturating_add(1);
                Ok(())
            }
            None => {
                state.stats.queue_overflows = state.stats.queue_overflows.saturating_add(1);
                Err(FswError::Overflow)
            }
        }
    }

    /// Dequeue the highest-priority packet; ties go to the most recent
    pub fn dequeue_packet(&self) -> Option<TmPacket> {
        let mut state = self.state.lock(Timeout::Forever).ok()?;
        let mut best: Option<usize> = None;
        for (index, slot) in state.queue.iter().enumerate() {
            let Some(entry) = slot else { continue };
            match best {
                None => best = Some(index),
                Some(current) => {
                    let current_entry = state.queue[current].as_ref()?;
                    if (entry.priority, entry.stamp) >= (current_entry.priority, current_entry.stamp)
                    {
                        best = Some(index);
                    }
                }
            }
        }
        let index = best?;
        let slot = state.queue[index].take()?;
        state.stats.packets_sent = state.stats.packets_sent.saturating_add(1);
        Some(slot.packet)
    }

    /// Number of packets waiting in the queue
    pub fn queue_count(&self) -> usize {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.queue.iter().filter(|slot| slot.is_some()).count())
            .unwrap_or(0)
    }

    /// Pipeline counters
    pub fn stats(&self) -> TmStats {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.stats)
            .unwrap_or_default()
    }

    /// Emit an event report packet at High priority
    ///
    /// Payload layout: event id (u16 BE), uptime milliseconds (u32 BE),
    /// then the optional event data.
    pub fn send_event(&self, event_id: u16, data: &[u8]) {
        let mut payload: heapless::Vec<u8, TM_GEN_MAX> = heapless::Vec::new();
        let _ = payload.extend_from_slice(&event_id.to_be_bytes());
        let timestamp = self.time.uptime_ms() as u32;
        let _ = payload.extend_from_slice(&timestamp.to_be_bytes());
        if !data.is_empty() && data.len() <= TM_GEN_MAX - 6 {
            let _ = payload.extend_from_slice(data);
        }

        let mut packet =
            self.codec.build_tm(apid::SYSTEM, pus::EVENT_REPORTING, TM_EVENT_REPORT_SUBTYPE);
        if packet.set_data(&payload).is_err() {
            return;
        }
        packet.finalize();
        let _ = self.queue_packet(packet, TmPriority::High);
    }
}

/// Standard housekeeping payload generators
pub mod generators {
    use super::{TmSources, TM_GEN_MAX};

    /// System housekeeping: uptime, mode, health, boot history
    pub fn system_hk(sources: &TmSources, out: &mut heapless::Vec<u8, TM_GEN_MAX>) {
        let summary = sources.health.summary();
        let _ = out.extend_from_slice(&sources.time.uptime_seconds().to_be_bytes());
        let _ = out.push(sources.mode.current() as u8);
        let _ = out.push(sources.health.health_flags());
        let _ = out.extend_from_slice(&(sources.boot.boot_count.min(u32::from(u16::MAX)) as u16).to_be_bytes());
        let _ = out.push(sources.boot.cause as u8);
        let _ = out.push(summary.error_count.min(255) as u8);
        let _ = out.push(summary.warning_count.min(255) as u8);
        let _ = out.push(0);
    }

    /// Power housekeeping from the EPS snapshot
    pub fn power_hk(sources: &TmSources, out: &mut heapless::Vec<u8, TM_GEN_MAX>) {
        let power = sources.power.power();
        let _ = out.extend_from_slice(&power.battery_voltage_mv.to_be_bytes());
        let _ = out.extend_from_slice(&power.battery_current_ma.to_be_bytes());
        let _ = out.push(power.battery_soc);
        let _ = out.push(power.battery_temp_c as u8);
        let _ = out.extend_from_slice(&power.solar_power_mw.to_be_bytes());
        let _ = out.push(power.rail_status);
        let _ = out.push(u8::from(power.low_power));
    }

    /// Attitude housekeeping from the ADCS snapshot
    pub fn adcs_hk(sources: &TmSources, out: &mut heapless::Vec<u8, TM_GEN_MAX>) {
        let attitude = sources.attitude.attitude();
        for component in attitude.quaternion {
            let _ = out.extend_from_slice(&component.to_be_bytes());
        }
        for rate in attitude.rates_mrad_s {
            let _ = out.extend_from_slice(&rate.to_be_bytes());
        }
        let _ = out.push(attitude.mode);
        let _ = out.push(attitude.status);
        let _ = out.extend_from_slice(&attitude.error_angle_mrad.to_be_bytes());
    }

    /// Radio link housekeeping
    pub fn comms_hk(sources: &TmSources, out: &mut heapless::Vec<u8, TM_GEN_MAX>) {
        let comms = sources.comms.comms();
        let _ = out.push(comms.rx_24h);
        let _ = out.push(comms.tx_24h);
        let _ = out.push(comms.rssi_dbm as u8);
        let _ = out.push(comms.crc_errors);
        let _ = out.push(comms.link_margin_db);
        let _ = out.push(0);
    }
}
