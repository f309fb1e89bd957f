//! End-to-end scenarios across the assembled flight core
//!
//! Each test boots the core against a simulated board and drives the
//! scheduler with a simulated clock, checking the externally observable
//! behavior: selected modes, queued telemetry, persistent-record contents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fsw_core::boot::{self, BootRecord};
use fsw_core::bsp::{Bsp, PowerRail};
use fsw_core::ccsds::parse_tc;
use fsw_core::fdir::FaultKind;
use fsw_core::osal::{Mutex, SimClock, Timeout};
use fsw_core::providers::FlatlineProviders;
use fsw_core::system::{FlightCore, Peripherals, SCHED_TICK_MS};
use fsw_core::telecommand::{TC_ACK_ACCEPTED, TC_ACK_EXECUTED, TC_ACK_FAILED};
use fsw_core::telemetry::{TmPriority, TM_QUEUE_SIZE};
use fsw_core::types::{apid, pus, ResetCause, SubsystemId, SystemMode};

/// Simulated board: scripted reset cause, inert actuators
struct SimBsp {
    cause: ResetCause,
    strap: AtomicBool,
}

impl SimBsp {
    fn new(cause: ResetCause) -> Self {
        Self { cause, strap: AtomicBool::new(false) }
    }
}

impl Bsp for SimBsp {
    fn clock_basic_init(&self) {}
    fn watchdog_init(&self) {}
    fn watchdog_kick(&self) {}
    fn watchdog_set_timeout(&self, _timeout_ms: u32) {}
    fn reset_get_cause(&self) -> ResetCause {
        self.cause
    }
    fn reset_software(&self) {}
    fn reset_subsystem(&self, _subsystem: SubsystemId) {}
    fn safe_mode_pin_asserted(&self) -> bool {
        self.strap.load(Ordering::SeqCst)
    }
    fn power_enter_low_power(&self) {}
    fn power_enable_rail(&self, _rail: PowerRail) {}
    fn power_disable_rail(&self, _rail: PowerRail) {}
}

struct Vehicle {
    clock: Arc<SimClock>,
    core: Arc<FlightCore>,
}

impl Vehicle {
    fn boot(record: BootRecord, cause: ResetCause) -> Self {
        let clock = Arc::new(SimClock::new());
        let bsp = Arc::new(SimBsp::new(cause));
        let mut record = record;
        let report = boot::run(&mut record, bsp.as_ref());
        let persistent = Arc::new(Mutex::new(record));

        let providers = Arc::new(FlatlineProviders);
        let core = FlightCore::start(
            report,
            persistent,
            bsp,
            clock.clone(),
            Peripherals {
                power: providers.clone(),
                attitude: providers.clone(),
                thermal: providers.clone(),
                comms: providers,
                beacon_sink: None,
            },
            "CUBE3U-1",
        );
        Self { clock, core }
    }

    /// Advance simulated time through whole scheduler ticks
    fn run_ms(&self, duration_ms: u32) {
        let ticks = duration_ms / SCHED_TICK_MS;
        for _ in 0..ticks {
            self.clock.advance(u64::from(SCHED_TICK_MS));
            self.core.scheduler_step(SCHED_TICK_MS);
        }
    }
}

#[test]
fn cold_boot_reinitializes_the_record() {
    let mut record = BootRecord::reinitialized();
    record.magic = 0xFFFF_FFFF; // corrupted survivor of launch

    let vehicle = Vehicle::boot(record, ResetCause::PowerOn);

    assert_eq!(vehicle.core.mode.current(), SystemMode::Detumble);
    assert_eq!(vehicle.core.boot.boot_count, 1);
    let persisted = vehicle.core.persistent.lock(Timeout::Forever).expect("lock");
    assert!(persisted.is_valid());
    assert_eq!(persisted.last_reset_cause, ResetCause::PowerOn);
}

#[test]
fn watchdog_loop_reaches_safe_and_reports_reset_loop() {
    let mut record = BootRecord::reinitialized();
    record.reset_count_watchdog = 2;
    record.boot_count = 2;
    record.seal();

    let vehicle = Vehicle::boot(record, ResetCause::Watchdog);

    assert_eq!(vehicle.core.mode.current(), SystemMode::Safe);
    {
        let persisted = vehicle.core.persistent.lock(Timeout::Forever).expect("lock");
        assert_eq!(persisted.reset_count_watchdog, 3);
        assert_eq!(persisted.boot_count, 3);
    }

    // boot_count >= 3 with a watchdog cause: the first FDIR pass reports the
    // loop, and after three accumulated reports the SafeMode rule is firing.
    assert!(vehicle.core.fdir.reset_loop_detected());
    vehicle.run_ms(1000);
    assert!(vehicle.core.fdir.is_fault_active(FaultKind::ResetLoop));
    assert!(vehicle.core.fdir.fault_count(FaultKind::ResetLoop) >= 3);
    assert_eq!(vehicle.core.mode.current(), SystemMode::Safe);
}

fn nominal_vehicle() -> Vehicle {
    // Software reset with no requested mode boots straight to NOMINAL.
    Vehicle::boot(BootRecord::reinitialized(), ResetCause::Software)
}

#[test]
fn ping_round_trip_produces_acks_and_pong() {
    let vehicle = nominal_vehicle();
    assert_eq!(vehicle.core.mode.current(), SystemMode::Nominal);

    let mut tc = vehicle.core.codec.build_tc(apid::SYSTEM, pus::TEST, 1);
    tc.finalize();
    let mut wire = [0u8; 64];
    let written = tc.serialize(&mut wire);
    vehicle.core.telecommand.submit_raw(&wire[..written]).expect("submit");

    // One housekeeping cycle: the TC job drains the ingress queue.
    vehicle.run_ms(100);

    let mut acks = Vec::new();
    let mut responses = Vec::new();
    while let Some(packet) = vehicle.core.telemetry.dequeue_packet() {
        if packet.secondary.service_type == pus::REQUEST_VERIFICATION {
            acks.push(packet.secondary.service_subtype);
        } else if packet.secondary.service_type == pus::TEST {
            responses.push(packet);
        }
    }

    // Drain order within one priority is most-recent-first; both acks must
    // be present regardless.
    acks.sort_unstable();
    assert_eq!(acks, vec![TC_ACK_ACCEPTED, TC_ACK_EXECUTED]);
    assert_eq!(responses.len(), 1);
    assert_eq!(&responses[0].data[..], b"PONG");
}

#[test]
fn ground_commands_the_vehicle_out_of_safe() {
    let mut record = BootRecord::reinitialized();
    record.reset_count_watchdog = 3;
    record.seal();
    let vehicle = Vehicle::boot(record, ResetCause::Pin);
    assert_eq!(vehicle.core.mode.current(), SystemMode::Safe);

    let mut tc = vehicle.core.codec.build_tc(apid::SYSTEM, pus::FUNCTION_MGMT, 1);
    tc.set_data(&[SystemMode::Nominal as u8]).expect("set data");
    tc.finalize();
    let mut wire = [0u8; 64];
    let written = tc.serialize(&mut wire);
    vehicle.core.telecommand.submit_raw(&wire[..written]).expect("submit");

    // TC housekeeping accepts and requests; the mode job commits.
    vehicle.run_ms(400);

    assert_eq!(vehicle.core.mode.current(), SystemMode::Nominal);
    assert_eq!(vehicle.core.mode.previous(), SystemMode::Safe);
    assert_eq!(vehicle.core.telecommand.stats().executed, 1);
}

#[test]
fn critical_telemetry_preempts_a_full_queue() {
    let vehicle = nominal_vehicle();

    let filler = |priority| {
        let mut packet = vehicle.core.codec.build_tm(apid::SYSTEM, pus::HOUSEKEEPING, 25);
        packet.set_data(&[0u8]).expect("set data");
        packet.finalize();
        vehicle.core.telemetry.queue_packet(packet, priority)
    };

    for _ in 0..TM_QUEUE_SIZE {
        filler(TmPriority::Normal).expect("fill");
    }
    assert_eq!(vehicle.core.telemetry.queue_count(), TM_QUEUE_SIZE);

    filler(TmPriority::Critical).expect("preempt");
    assert_eq!(vehicle.core.telemetry.queue_count(), TM_QUEUE_SIZE);
    assert_eq!(vehicle.core.telemetry.stats().queue_overflows, 0);
}

#[test]
fn corrupted_uplink_is_rejected_with_ack_and_history() {
    let vehicle = nominal_vehicle();

    let mut tc = vehicle.core.codec.build_tc(apid::SYSTEM, pus::TEST, 1);
    tc.set_data(&[0x42]).expect("set data");
    tc.finalize();
    let mut wire = [0u8; 64];
    let written = tc.serialize(&mut wire);
    wire[16] ^= 0x01; // flip one data bit

    let parsed = parse_tc(&wire[..written]).expect("parse");
    assert!(!parsed.validate());

    vehicle.core.telecommand.submit_raw(&wire[..written]).expect("submit");
    vehicle.run_ms(100);

    let stats = vehicle.core.telecommand.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.accepted, 0);

    let record = vehicle.core.telecommand.last_record().expect("history");
    assert_eq!(record.status, fsw_core::telecommand::TcStatus::RejectedInvalid);

    let mut failed_acks = 0;
    while let Some(packet) = vehicle.core.telemetry.dequeue_packet() {
        if packet.secondary.service_type == pus::REQUEST_VERIFICATION
            && packet.secondary.service_subtype == TC_ACK_FAILED
        {
            failed_acks += 1;
        }
    }
    assert_eq!(failed_acks, 1);
}

#[test]
fn detumble_times_out_into_safe() {
    let vehicle = Vehicle::boot(BootRecord::reinitialized(), ResetCause::PowerOn);
    assert_eq!(vehicle.core.mode.current(), SystemMode::Detumble);

    // 30 minutes of flight in coarse steps (the mode job runs every 200 ms;
    // step the clock in scheduler-visible chunks).
    for _ in 0..1800 {
        vehicle.clock.advance(1000);
        vehicle.core.scheduler_step(1000);
    }
    assert_eq!(vehicle.core.mode.current(), SystemMode::Safe);
}

#[test]
fn safe_mode_strap_wins_over_everything() {
    let clock = Arc::new(SimClock::new());
    let bsp = SimBsp::new(ResetCause::Software);
    bsp.strap.store(true, Ordering::SeqCst);
    let bsp = Arc::new(bsp);

    let mut record = BootRecord::reinitialized();
    let report = boot::run(&mut record, bsp.as_ref());
    assert_eq!(report.mode, SystemMode::Safe);

    let providers = Arc::new(FlatlineProviders);
    let core = FlightCore::start(
        report,
        Arc::new(Mutex::new(record)),
        bsp,
        clock,
        Peripherals {
            power: providers.clone(),
            attitude: providers.clone(),
            thermal: providers.clone(),
            comms: providers,
            beacon_sink: None,
        },
        "CUBE3U-1",
    );
    assert_eq!(core.mode.current(), SystemMode::Safe);
}
