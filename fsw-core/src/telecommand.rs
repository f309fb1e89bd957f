//! Telecommand dispatch
//!
//! Uplinked packets flow through a single pipeline: structural validation
//! (CRC, version, type, known handler), authorization against the handler's
//! required level and the safe-mode allow-list, then execution. Every
//! acceptance and every rejection produces a PUS service 1 acknowledgment;
//! execution outcomes land in a bounded history ring.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boot::BootRecord;
use crate::ccsds::{parse_tc, Codec, TcPacket, CCSDS_MAX_PACKET_SIZE};
use crate::error::{FswError, Result};
use crate::events::EventLog;
use crate::mode::ModeManager;
use crate::osal::{BoundedQueue, Mutex, Timeout};
use crate::telemetry::{Telemetry, TmPriority};
use crate::time::{TimeService, Timestamp};
use crate::types::{apid, pus, SubsystemId, SystemMode};

/// Maximum number of registered command handlers
pub const TC_MAX_HANDLERS: usize = 64;

/// Command history depth
pub const TC_HISTORY_SIZE: usize = 16;

/// Safe-mode allow-list capacity
pub const TC_SAFE_LIST_SIZE: usize = 16;

/// Authentication key size in bytes
pub const TC_AUTH_KEY_SIZE: usize = 16;

/// Maximum handler response size in bytes
pub const TC_RESPONSE_MAX: usize = 256;

/// Ingress queue depth for raw uplink frames
pub const TC_INGRESS_DEPTH: usize = 8;

/// Acknowledgment subtype: command accepted
pub const TC_ACK_ACCEPTED: u8 = 1;

/// Acknowledgment subtype: command executed
pub const TC_ACK_EXECUTED: u8 = 7;

/// Acknowledgment subtype: command failed or rejected
pub const TC_ACK_FAILED: u8 = 8;

/// Authorization levels, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum AuthLevel {
    None = 0,
    Basic = 1,
    Elevated = 2,
    Critical = 3,
}

/// Outcome of command processing; the ordinal travels in acknowledgments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TcStatus {
    Accepted = 0,
    RejectedAuth = 1,
    RejectedInvalid = 2,
    RejectedBusy = 3,
    Executed = 4,
    Failed = 5,
    Timeout = 6,
}

/// Collaborators available to command handlers
pub struct TcServices {
    /// Mode manager for mode-change commands
    pub mode: Arc<ModeManager>,
    /// Telemetry pipeline for housekeeping control
    pub telemetry: Arc<Telemetry>,
    /// Time service for time synchronization
    pub time: Arc<TimeService>,
    /// Persistent boot record, for reset sequencing
    pub persistent: Arc<Mutex<BootRecord>>,
}

impl std::fmt::Debug for TcServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcServices").finish_non_exhaustive()
    }
}

/// Command handler: consumes the data field, fills the response buffer
pub type TcHandlerFn =
    fn(&TcServices, &[u8], &mut heapless::Vec<u8, TC_RESPONSE_MAX>) -> TcStatus;

/// One registered command
#[derive(Clone, Copy)]
pub struct TcDefinition {
    /// PUS service type
    pub service_type: u8,
    /// PUS service subtype
    pub service_subtype: u8,
    /// Required authorization level
    pub auth_level: AuthLevel,
    /// Handler body
    pub handler: TcHandlerFn,
    /// Human-readable name for logs
    pub name: &'static str,
    /// Execution budget in milliseconds
    pub timeout_ms: u32,
}

/// One history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcRecord {
    /// CCSDS sequence count of the packet
    pub sequence: u16,
    /// PUS service type
    pub service_type: u8,
    /// PUS service subtype
    pub service_subtype: u8,
    /// Uptime milliseconds when recorded
    pub timestamp_ms: u64,
    /// Final status
    pub status: TcStatus,
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcStats {
    /// Commands accepted
    pub accepted: u32,
    /// Commands rejected (invalid or unauthorized)
    pub rejected: u32,
    /// Commands executed successfully
    pub executed: u32,
    /// Raw frames dropped at the ingress queue
    pub ingress_dropped: u32,
}

/// Raw uplink frame awaiting parsing
pub type RawTcFrame = heapless::Vec<u8, CCSDS_MAX_PACKET_SIZE>;

struct TcState {
    handlers: heapless::Vec<TcDefinition, TC_MAX_HANDLERS>,
    history: [Option<TcRecord>; TC_HISTORY_SIZE],
    history_idx: usize,
    safe_list: heapless::Vec<(u8, u8), TC_SAFE_LIST_SIZE>,
    auth_key: [u8; TC_AUTH_KEY_SIZE],
    auth_key_len: usize,
    auth_key_set: bool,
    stats: TcStats,
}

/// The telecommand dispatcher
pub struct Dispatcher {
    state: Mutex<TcState>,
    ingress: BoundedQueue<RawTcFrame, TC_INGRESS_DEPTH>,
    codec: Arc<Codec>,
    events: Arc<EventLog>,
    services: TcServices,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("stats", &self.stats()).finish()
    }
}

impl Dispatcher {
    /// Create the dispatcher and register the standard command set
    pub fn new(codec: Arc<Codec>, events: Arc<EventLog>, services: TcServices) -> Self {
        let dispatcher = Self {
            state: Mutex::new(TcState {
                handlers: heapless::Vec::new(),
                history: [None; TC_HISTORY_SIZE],
                history_idx: 0,
                safe_list: heapless::Vec::new(),
                auth_key: [0; TC_AUTH_KEY_SIZE],
                auth_key_len: 0,
                auth_key_set: false,
                stats: TcStats::default(),
            }),
            ingress: BoundedQueue::new(),
            codec,
            events,
            services,
        };

        let standard = [
            TcDefinition {
                service_type: pus::TEST,
                service_subtype: 1,
                auth_level: AuthLevel::None,
                handler: handlers::ping,
                name: "Ping",
                timeout_ms: 1000,
            },
            TcDefinition {
                service_type: pus::TEST,
                service_subtype: 2,
                auth_level: AuthLevel::None,
                handler: handlers::connection_test,
                name: "Connection Test",
                timeout_ms: 5000,
            },
            TcDefinition {
                service_type: pus::FUNCTION_MGMT,
                service_subtype: 1,
                auth_level: AuthLevel::Elevated,
                handler: handlers::mode_change,
                name: "Mode Change",
                timeout_ms: 5000,
            },
            TcDefinition {
                service_type: pus::FUNCTION_MGMT,
                service_subtype: 4,
                auth_level: AuthLevel::Critical,
                handler: handlers::reset,
                name: "System Reset",
                timeout_ms: 10_000,
            },
            TcDefinition {
                service_type: pus::HOUSEKEEPING,
                service_subtype: 5,
                auth_level: AuthLevel::Basic,
                handler: handlers::enable_hk,
                name: "Enable HK",
                timeout_ms: 1000,
            },
            TcDefinition {
                service_type: pus::HOUSEKEEPING,
                service_subtype: 6,
                auth_level: AuthLevel::Basic,
                handler: handlers::disable_hk,
                name: "Disable HK",
                timeout_ms: 1000,
            },
            TcDefinition {
                service_type: pus::TIME_MGMT,
                service_subtype: 1,
                auth_level: AuthLevel::Elevated,
                handler: handlers::time_sync,
                name: "Time Sync",
                timeout_ms: 2000,
            },
        ];
        for def in standard {
            let _ = dispatcher.register(def);
        }

        // Commands executable while in SAFE. Mode change is included so the
        // ground can command the vehicle back out.
        let safe = [
            (pus::TEST, 1),
            (pus::TEST, 2),
            (pus::HOUSEKEEPING, 5),
            (pus::HOUSEKEEPING, 6),
            (pus::FUNCTION_MGMT, 1),
        ];
        for (service_type, service_subtype) in safe {
            let _ = dispatcher.add_to_safe_list(service_type, service_subtype);
        }

        dispatcher
    }

    /// Register a command handler
    ///
    /// Fails with `Busy` when the (service, subtype) pair is taken and with
    /// `NoMemory` when the table is full.
    pub fn register(&self, def: TcDefinition) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        if state
            .handlers
            .iter()
            .any(|h| h.service_type == def.service_type && h.service_subtype == def.service_subtype)
        {
            return Err(FswError::Busy);
        }
        state.handlers.push(def).map_err(|_| FswError::NoMemory)?;
        Ok(())
    }

    /// Install the authorization key (1 to 16 bytes)
    pub fn set_auth_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() || key.len() > TC_AUTH_KEY_SIZE {
            return Err(FswError::InvalidParam);
        }
        let mut state = self.state.lock(Timeout::Forever)?;
        state.auth_key = [0; TC_AUTH_KEY_SIZE];
        state.auth_key[..key.len()].copy_from_slice(key);
        state.auth_key_len = key.len();
        state.auth_key_set = true;
        Ok(())
    }

    /// Verify the authentication of an elevated command
    ///
    /// TODO: verify an HMAC trailer over the packet once the key-management
    /// command defines the MAC scheme; until then elevated commands pass.
    pub fn verify_auth(&self, _packet: &TcPacket) -> bool {
        true
    }

    /// Add a (service, subtype) pair to the safe-mode allow-list
    pub fn add_to_safe_list(&self, service_type: u8, service_subtype: u8) -> Result<()> {
        let mut state = self.state.lock(Timeout::Forever)?;
        if state
            .safe_list
            .iter()
            .any(|&(s, t)| s == service_type && t == service_subtype)
        {
            return Ok(());
        }
        state
            .safe_list
            .push((service_type, service_subtype))
            .map_err(|_| FswError::NoMemory)?;
        Ok(())
    }

    /// Whether a pair is executable in SAFE
    pub fn is_safe_listed(&self, service_type: u8, service_subtype: u8) -> bool {
        self.state
            .lock(Timeout::Forever)
            .map(|state| {
                state
                    .safe_list
                    .iter()
                    .any(|&(s, t)| s == service_type && t == service_subtype)
            })
            .unwrap_or(false)
    }

    /// Structural validation: CRC, version, type, and a known handler
    pub fn validate(&self, packet: &TcPacket) -> bool {
        if !packet.validate() {
            return false;
        }
        self.find_handler(packet.secondary.service_type, packet.secondary.service_subtype)
            .is_some()
    }

    fn find_handler(&self, service_type: u8, service_subtype: u8) -> Option<TcDefinition> {
        self.state.lock(Timeout::Forever).ok().and_then(|state| {
            state
                .handlers
                .iter()
                .find(|h| h.service_type == service_type && h.service_subtype == service_subtype)
                .copied()
        })
    }

    /// Authorization decision for a packet requiring `required`
    pub fn authorize(&self, packet: &TcPacket, required: AuthLevel) -> bool {
        if required == AuthLevel::None {
            return true;
        }

        if self.services.mode.current() == SystemMode::Safe
            && !self.is_safe_listed(
                packet.secondary.service_type,
                packet.secondary.service_subtype,
            )
        {
            return false;
        }

        let key_set = self
            .state
            .lock(Timeout::Forever)
            .map(|state| state.auth_key_set)
            .unwrap_or(false);
        if key_set && required >= AuthLevel::Elevated {
            return self.verify_auth(packet);
        }

        true
    }

    /// Run a packet through the full pipeline
    pub fn process(&self, packet: &TcPacket) -> TcStatus {
        let sequence = packet.primary.sequence();
        let in_safe = self.services.mode.current() == SystemMode::Safe;

        // Acceptance decision under the mutex; the handler runs outside it.
        let definition = {
            let mut state = match self.state.lock(Timeout::Forever) {
                Ok(state) => state,
                Err(_) => return TcStatus::RejectedBusy,
            };

            let structural_ok = packet.validate();
            let definition = state
                .handlers
                .iter()
                .find(|h| {
                    h.service_type == packet.secondary.service_type
                        && h.service_subtype == packet.secondary.service_subtype
                })
                .copied();

            let Some(definition) = definition.filter(|_| structural_ok) else {
                state.stats.rejected = state.stats.rejected.saturating_add(1);
                Self::record(&mut state, packet, sequence, TcStatus::RejectedInvalid, self.now());
                drop(state);
                self.events.warning(SubsystemId::Comms, "TC rejected: invalid");
                self.send_ack(sequence, TcStatus::RejectedInvalid);
                return TcStatus::RejectedInvalid;
            };

            let authorized = if definition.auth_level == AuthLevel::None {
                true
            } else if in_safe
                && !state.safe_list.iter().any(|&(s, t)| {
                    s == packet.secondary.service_type && t == packet.secondary.service_subtype
                })
            {
                false
            } else if state.auth_key_set && definition.auth_level >= AuthLevel::Elevated {
                self.verify_auth(packet)
            } else {
                true
            };

            if !authorized {
                state.stats.rejected = state.stats.rejected.saturating_add(1);
                Self::record(&mut state, packet, sequence, TcStatus::RejectedAuth, self.now());
                drop(state);
                self.events.warning(SubsystemId::Comms, "TC rejected: auth");
                self.send_ack(sequence, TcStatus::RejectedAuth);
                return TcStatus::RejectedAuth;
            }

            state.stats.accepted = state.stats.accepted.saturating_add(1);
            definition
        };

        self.send_ack(sequence, TcStatus::Accepted);
        log::debug!("executing TC {}", definition.name);

        let mut response: heapless::Vec<u8, TC_RESPONSE_MAX> = heapless::Vec::new();
        let status = (definition.handler)(&self.services, &packet.data, &mut response);

        if let Ok(mut state) = self.state.lock(Timeout::Forever) {
            if status == TcStatus::Executed {
                state.stats.executed = state.stats.executed.saturating_add(1);
            }
            Self::record(&mut state, packet, sequence, status, self.now());
        }
        self.send_ack(sequence, status);

        if status == TcStatus::Executed && !response.is_empty() {
            self.send_response(packet, &response);
        }

        status
    }

    /// Hand a raw uplink frame to the dispatcher (radio driver entry point)
    pub fn submit_raw(&self, raw: &[u8]) -> Result<()> {
        if raw.len() > CCSDS_MAX_PACKET_SIZE {
            return Err(FswError::InvalidParam);
        }
        let mut frame: RawTcFrame = heapless::Vec::new();
        frame.extend_from_slice(raw).map_err(|_| FswError::InvalidParam)?;
        if self.ingress.send(frame, Timeout::NoWait).is_err() {
            if let Ok(mut state) = self.state.lock(Timeout::Forever) {
                state.stats.ingress_dropped = state.stats.ingress_dropped.saturating_add(1);
            }
            return Err(FswError::Overflow);
        }
        Ok(())
    }

    /// Housekeeping job: drain and process queued uplink frames
    pub fn periodic(&self) {
        for _ in 0..TC_INGRESS_DEPTH {
            let Ok(frame) = self.ingress.receive(Timeout::NoWait) else {
                break;
            };
            match parse_tc(&frame) {
                Ok(packet) => {
                    self.process(&packet);
                }
                Err(_) => {
                    if let Ok(mut state) = self.state.lock(Timeout::Forever) {
                        state.stats.rejected = state.stats.rejected.saturating_add(1);
                    }
                    self.events.warning(SubsystemId::Comms, "TC frame unparseable");
                }
            }
        }
    }

    fn now(&self) -> u64 {
        self.services.time.uptime_ms()
    }

    fn record(state: &mut TcState, packet: &TcPacket, sequence: u16, status: TcStatus, now: u64) {
        let index = state.history_idx;
        state.history[index] = Some(TcRecord {
            sequence,
            service_type: packet.secondary.service_type,
            service_subtype: packet.secondary.service_subtype,
            timestamp_ms: now,
            status,
        });
        state.history_idx = (index + 1) % TC_HISTORY_SIZE;
    }

    /// Queue a PUS service 1 acknowledgment
    ///
    /// Payload: sequence (u16 BE), status ordinal, reserved byte, uptime
    /// milliseconds (u32 BE).
    pub fn send_ack(&self, sequence: u16, status: TcStatus) {
        let subtype = match status {
            TcStatus::Accepted => TC_ACK_ACCEPTED,
            TcStatus::Executed => TC_ACK_EXECUTED,
            _ => TC_ACK_FAILED,
        };

        let mut payload = [0u8; 8];
        payload[0..2].copy_from_slice(&sequence.to_be_bytes());
        payload[2] = status as u8;
        payload[3] = 0;
        let now = self.now() as u32;
        payload[4..8].copy_from_slice(&now.to_be_bytes());

        let mut packet = self
            .codec
            .build_tm(apid::SYSTEM, pus::REQUEST_VERIFICATION, subtype);
        if packet.set_data(&payload).is_err() {
            return;
        }
        packet.finalize();
        let _ = self.services.telemetry.queue_packet(packet, TmPriority::High);
    }

    fn send_response(&self, request: &TcPacket, response: &[u8]) {
        let mut packet = self.codec.build_tm(
            apid::SYSTEM,
            request.secondary.service_type,
            request.secondary.service_subtype,
        );
        if packet.set_data(response).is_err() {
            return;
        }
        packet.finalize();
        let _ = self.services.telemetry.queue_packet(packet, TmPriority::Normal);
    }

    /// Dispatcher counters
    pub fn stats(&self) -> TcStats {
        self.state
            .lock(Timeout::Forever)
            .map(|state| state.stats)
            .unwrap_or_default()
    }

    /// Most recent history record
    pub fn last_record(&self) -> Option<TcRecord> {
        self.state.lock(Timeout::Forever).ok().and_then(|state| {
            let index = (state.history_idx + TC_HISTORY_SIZE - 1) % TC_HISTORY_SIZE;
            state.history[index]
        })
    }
}

/// Standard command handler bodies
pub mod handlers {
    use super::*;

    /// Service 17,1: liveness probe, answers "PONG"
    pub fn ping(
        _services: &TcServices,
        _data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
    ) -> TcStatus {
        let _ = response.extend_from_slice(b"PONG");
        TcStatus::Executed
    }

    /// Service 17,2: echoes the received data back
    pub fn connection_test(
        _services: &TcServices,
        data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
    ) -> TcStatus {
        if !data.is_empty() && data.len() <= 200 {
            let _ = response.extend_from_slice(data);
        }
        TcStatus::Executed
    }

    /// Service 8,1: request a mode transition; payload is the mode ordinal
    pub fn mode_change(
        services: &TcServices,
        data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
    ) -> TcStatus {
        let Some(&raw) = data.first() else {
            return TcStatus::Failed;
        };
        let Some(target) = SystemMode::from_u8(raw) else {
            return TcStatus::Failed;
        };

        let result = services.mode.request(target);
        let _ = response.push(u8::from(result.is_ok()));
        let _ = response.push(services.mode.current() as u8);
        if result.is_ok() {
            TcStatus::Executed
        } else {
            TcStatus::Failed
        }
    }

    /// Service 8,4: acknowledge a reset request
    ///
    /// TODO: arm a deferred software reset through FDIR after the
    /// acknowledgment has been transmitted.
    pub fn reset(
        _services: &TcServices,
        _data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
    ) -> TcStatus {
        let _ = response.push(1);
        TcStatus::Executed
    }

    /// Service 3,5: enable a housekeeping packet by id (u16 BE)
    pub fn enable_hk(
        services: &TcServices,
        data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
    ) -> TcStatus {
        hk_toggle(services, data, response, true)
    }

    /// Service 3,6: disable a housekeeping packet by id (u16 BE)
    pub fn disable_hk(
        services: &TcServices,
        data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
    ) -> TcStatus {
        hk_toggle(services, data, response, false)
    }

    fn hk_toggle(
        services: &TcServices,
        data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
        enable: bool,
    ) -> TcStatus {
        if data.len() < 2 {
            return TcStatus::Failed;
        }
        let packet_id = u16::from_be_bytes([data[0], data[1]]);
        let result = if enable {
            services.telemetry.enable(packet_id)
        } else {
            services.telemetry.disable(packet_id)
        };
        let _ = response.push(u8::from(result.is_ok()));
        if result.is_ok() {
            TcStatus::Executed
        } else {
            TcStatus::Failed
        }
    }

    /// Service 9,1: synchronize UTC; payload is seconds (u32 BE) and
    /// sub-seconds (u16 BE); answers with the new current seconds
    pub fn time_sync(
        services: &TcServices,
        data: &[u8],
        response: &mut heapless::Vec<u8, TC_RESPONSE_MAX>,
    ) -> TcStatus {
        if data.len() < 6 {
            return TcStatus::Failed;
        }
        let seconds = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let subseconds = u32::from(u16::from_be_bytes([data[4], data[5]]));
        if services.time.sync_utc(Timestamp { seconds, subseconds }).is_err() {
            return TcStatus::Failed;
        }

        let current = services.time.timestamp();
        let _ = response.extend_from_slice(&current.seconds.to_be_bytes());
        TcStatus::Executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::BootReport;
    use crate::health::HealthMonitor;
    use crate::osal::SimClock;
    use crate::providers::FlatlineProviders;
    use crate::telemetry::TmSources;
    use crate::types::ResetCause;

    struct Fixture {
        clock: Arc<SimClock>,
        codec: Arc<Codec>,
        mode: Arc<ModeManager>,
        telemetry: Arc<Telemetry>,
        time: Arc<TimeService>,
        dispatcher: Dispatcher,
    }

    fn fixture(initial_mode: SystemMode) -> Fixture {
        let clock = Arc::new(SimClock::new());
        let time = Arc::new(TimeService::new(clock.clone()));
        let events = Arc::new(EventLog::new(clock.clone()));
        let mode = Arc::new(ModeManager::new(initial_mode, clock.clone()));
        let providers = Arc::new(FlatlineProviders);
        let codec = Arc::new(Codec::new(time.clone()));
        let telemetry = Arc::new(Telemetry::new(
            codec.clone(),
            time.clone(),
            TmSources {
                mode: mode.clone(),
                time: time.clone(),
                health: Arc::new(HealthMonitor::new(clock.clone(), events.clone())),
                power: providers.clone(),
                attitude: providers.clone(),
                thermal: providers.clone(),
                comms: providers,
                boot: BootReport {
                    cause: ResetCause::PowerOn,
                    mode: initial_mode,
                    boot_count: 1,
                    watchdog_resets: 0,
                },
            },
        ));
        let dispatcher = Dispatcher::new(
            codec.clone(),
            events,
            TcServices {
                mode: mode.clone(),
                telemetry: telemetry.clone(),
                time: time.clone(),
                persistent: Arc::new(Mutex::new(BootRecord::reinitialized())),
            },
        );
        Fixture { clock, codec, mode, telemetry, time, dispatcher }
    }

    fn command(f: &Fixture, service_type: u8, service_subtype: u8, data: &[u8]) -> TcPacket {
        let mut tc = f.codec.build_tc(apid::SYSTEM, service_type, service_subtype);
        tc.set_data(data).expect("set data");
        tc.finalize();
        tc
    }

    #[test]
    fn ping_yields_two_acks_and_pong() {
        let f = fixture(SystemMode::Nominal);
        let tc = command(&f, pus::TEST, 1, &[]);
        assert_eq!(f.dispatcher.process(&tc), TcStatus::Executed);

        // Both acks sit at High priority; the dequeue tie-break prefers the
        // most recent, so the executed ack drains first.
        let executed = f.telemetry.dequeue_packet().expect("executed ack");
        assert_eq!(executed.secondary.service_type, pus::REQUEST_VERIFICATION);
        assert_eq!(executed.secondary.service_subtype, TC_ACK_EXECUTED);

        let accepted = f.telemetry.dequeue_packet().expect("accepted ack");
        assert_eq!(accepted.secondary.service_subtype, TC_ACK_ACCEPTED);

        let response = f.telemetry.dequeue_packet().expect("response");
        assert_eq!(response.secondary.service_type, pus::TEST);
        assert_eq!(&response.data[..], b"PONG");
        assert!(f.telemetry.dequeue_packet().is_none());

        let stats = f.dispatcher.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.executed, 1);
    }

    #[test]
    fn corrupted_packet_is_rejected_with_ack() {
        let f = fixture(SystemMode::Nominal);
        let mut tc = command(&f, pus::TEST, 1, &[1, 2, 3]);
        tc.data[0] ^= 0xFF; // CRC now stale

        assert_eq!(f.dispatcher.process(&tc), TcStatus::RejectedInvalid);
        assert_eq!(f.dispatcher.stats().rejected, 1);

        let record = f.dispatcher.last_record().expect("history");
        assert_eq!(record.status, TcStatus::RejectedInvalid);

        let ack = f.telemetry.dequeue_packet().expect("rejected ack");
        assert_eq!(ack.secondary.service_subtype, TC_ACK_FAILED);
        assert!(f.telemetry.dequeue_packet().is_none());
    }

    #[test]
    fn unknown_service_is_invalid() {
        let f = fixture(SystemMode::Nominal);
        let tc = command(&f, 99, 99, &[]);
        assert_eq!(f.dispatcher.process(&tc), TcStatus::RejectedInvalid);
    }

    #[test]
    fn duplicate_registration_is_busy() {
        let f = fixture(SystemMode::Nominal);
        let result = f.dispatcher.register(TcDefinition {
            service_type: pus::TEST,
            service_subtype: 1,
            auth_level: AuthLevel::None,
            handler: handlers::ping,
            name: "Duplicate Ping",
            timeout_ms: 1000,
        });
        assert_eq!(result, Err(FswError::Busy));
    }

    #[test]
    fn mode_change_from_safe_is_allowed() {
        let f = fixture(SystemMode::Safe);
        let tc = command(&f, pus::FUNCTION_MGMT, 1, &[SystemMode::Nominal as u8]);
        assert_eq!(f.dispatcher.process(&tc), TcStatus::Executed);

        f.mode.process();
        assert_eq!(f.mode.current(), SystemMode::Nominal);
        assert_eq!(f.mode.previous(), SystemMode::Safe);
    }

    #[test]
    fn non_safe_listed_command_rejected_in_safe_mode() {
        let f = fixture(SystemMode::Safe);
        // Time sync (9,1) requires Elevated and is not on the allow-list.
        let tc = command(&f, pus::TIME_MGMT, 1, &[0, 0, 0, 10, 0, 0]);
        assert_eq!(f.dispatcher.process(&tc), TcStatus::RejectedAuth);

        let record = f.dispatcher.last_record().expect("history");
        assert_eq!(record.status, TcStatus::RejectedAuth);
        let ack = f.telemetry.dequeue_packet().expect("ack");
        assert_eq!(ack.secondary.service_subtype, TC_ACK_FAILED);
    }

    #[test]
    fn illegal_mode_change_fails_with_ack_trail() {
        let f = fixture(SystemMode::Boot);
        let tc = command(&f, pus::FUNCTION_MGMT, 1, &[SystemMode::Nominal as u8]);
        assert_eq!(f.dispatcher.process(&tc), TcStatus::Failed);

        // Most-recent-first within one priority: failed ack, then accepted.
        let first = f.telemetry.dequeue_packet().expect("failed");
        assert_eq!(first.secondary.service_subtype, TC_ACK_FAILED);
        let second = f.telemetry.dequeue_packet().expect("accepted");
        assert_eq!(second.secondary.service_subtype, TC_ACK_ACCEPTED);
    }

    #[test]
    fn time_sync_sets_utc() {
        let f = fixture(SystemMode::Nominal);
        f.clock.advance(2000);
        let tc = command(&f, pus::TIME_MGMT, 1, &[0x00, 0x0F, 0x42, 0x40, 0x00, 0x00]);
        assert_eq!(f.dispatcher.process(&tc), TcStatus::Executed);
        assert!(f.time.is_synced());
        assert_eq!(f.time.utc().expect("utc").seconds, 1_000_000);
    }

    #[test]
    fn hk_enable_disable_round_trip() {
        let f = fixture(SystemMode::Nominal);
        let disable = command(&f, pus::HOUSEKEEPING, 6, &[0x00, 0x02]);
        assert_eq!(f.dispatcher.process(&disable), TcStatus::Executed);
        assert!(!f.telemetry.is_enabled(2));

        let enable = command(&f, pus::HOUSEKEEPING, 5, &[0x00, 0x02]);
        assert_eq!(f.dispatcher.process(&enable), TcStatus::Executed);
        assert!(f.telemetry.is_enabled(2));
    }

    #[test]
    fn ingress_queue_feeds_periodic() {
        let f = fixture(SystemMode::Nominal);
        let tc = command(&f, pus::TEST, 1, &[]);
        let mut wire = [0u8; 64];
        let written = tc.serialize(&mut wire);
        f.dispatcher.submit_raw(&wire[..written]).expect("submit");

        assert_eq!(f.dispatcher.stats().accepted, 0);
        f.dispatcher.periodic();
        assert_eq!(f.dispatcher.stats().accepted, 1);
    }

    #[test]
    fn ingress_overflow_is_counted() {
        let f = fixture(SystemMode::Nominal);
        let tc = command(&f, pus::TEST, 1, &[]);
        let mut wire = [0u8; 64];
        let written = tc.serialize(&mut wire);
        for _ in 0..TC_INGRESS_DEPTH {
            f.dispatcher.submit_raw(&wire[..written]).expect("submit");
        }
        assert_eq!(
            f.dispatcher.submit_raw(&wire[..written]),
            Err(FswError::Overflow)
        );
        assert_eq!(f.dispatcher.stats().ingress_dropped, 1);
    }

    #[test]
    fn history_wraps() {
        let f = fixture(SystemMode::Nominal);
        for i in 0..(TC_HISTORY_SIZE + 2) {
            let tc = command(&f, pus::TEST, 1, &[i as u8]);
            f.dispatcher.process(&tc);
            while f.telemetry.dequeue_packet().is_some() {}
        }
        let record = f.dispatcher.last_record().expect("history");
        assert_eq!(record.service_type, pus::TEST);
        assert_eq!(record.status, TcStatus::Executed);
    }

    #[test]
    fn validate_and_authorize_helpers() {
        let f = fixture(SystemMode::Safe);
        let ping = command(&f, pus::TEST, 1, &[]);
        assert!(f.dispatcher.validate(&ping));
        assert!(f.dispatcher.authorize(&ping, AuthLevel::None));

        let unknown = command(&f, 99, 1, &[]);
        assert!(!f.dispatcher.validate(&unknown));

        assert!(f.dispatcher.is_safe_listed(pus::TEST, 1));
        assert!(!f.dispatcher.is_safe_listed(pus::TIME_MGMT, 1));
        let time_sync = command(&f, pus::TIME_MGMT, 1, &[0; 6]);
        assert!(!f.dispatcher.authorize(&time_sync, AuthLevel::Elevated));
    }

    #[test]
    fn auth_key_validation() {
        let f = fixture(SystemMode::Nominal);
        assert_eq!(f.dispatcher.set_auth_key(&[]), Err(FswError::InvalidParam));
        assert_eq!(
            f.dispatcher.set_auth_key(&[0u8; TC_AUTH_KEY_SIZE + 1]),
            Err(FswError::InvalidParam)
        );
        f.dispatcher.set_auth_key(b"orbital-key").expect("set key");

        // With a key set, elevated commands still pass (verification stub).
        let tc = command(&f, pus::FUNCTION_MGMT, 1, &[SystemMode::Safe as u8]);
        assert_eq!(f.dispatcher.process(&tc), TcStatus::Executed);
    }
}
