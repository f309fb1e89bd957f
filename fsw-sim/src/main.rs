//! Hosted flight-core simulation
//!
//! Boots the flight core against a simulated board and battery, drives the
//! scheduler at the real 10 ms tick, plays ground station for a while
//! (pings, mode commands, telemetry drain) and prints a status summary.
//!
//! ```text
//! fsw-sim --reset-cause watchdog --duration-s 20
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use fsw_core::beacon::{BeaconSink, BEACON_FRAME_SIZE};
use fsw_core::boot::{self, BootRecord};
use fsw_core::bsp::{Bsp, PowerRail, RAIL_COUNT};
use fsw_core::osal::{Mutex, SystemClock, Ticker};
use fsw_core::providers::{
    AttitudeProvider, AttitudeSnapshot, CommsProvider, CommsSnapshot, PowerProvider,
    PowerSnapshot, ThermalProvider, ThermalSnapshot,
};
use fsw_core::system::{FlightCore, Peripherals, SCHED_TICK_MS};
use fsw_core::types::{apid, pus, ResetCause, SubsystemId, SystemMode};

/// Reset cause to inject into the simulated reset controller
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CauseArg {
    PowerOn,
    Pin,
    Watchdog,
    Software,
    BrownOut,
    LowPower,
}

impl From<CauseArg> for ResetCause {
    fn from(arg: CauseArg) -> Self {
        match arg {
            CauseArg::PowerOn => ResetCause::PowerOn,
            CauseArg::Pin => ResetCause::Pin,
            CauseArg::Watchdog => ResetCause::Watchdog,
            CauseArg::Software => ResetCause::Software,
            CauseArg::BrownOut => ResetCause::BrownOut,
            CauseArg::LowPower => ResetCause::LowPower,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "fsw-sim", about = "CubeSat flight core simulation")]
struct Args {
    /// Reset cause reported by the simulated board
    #[arg(long, value_enum, default_value = "power-on")]
    reset_cause: CauseArg,

    /// Prior watchdog reset count in the persistent record
    #[arg(long, default_value_t = 0)]
    watchdog_history: u32,

    /// Simulation duration in seconds
    #[arg(long, default_value_t = 15)]
    duration_s: u64,

    /// Beacon callsign
    #[arg(long, default_value = "CUBE3U-1")]
    callsign: String,

    /// Initial battery state of charge in percent
    #[arg(long, default_value_t = 80)]
    battery_soc: u8,
}

/// Simulated board: logs actuations, tracks rail state
struct SimBsp {
    cause: ResetCause,
    rails: StdMutex<[bool; RAIL_COUNT]>,
    watchdog_kicks: AtomicU32,
    reset_requested: AtomicBool,
}

impl SimBsp {
    fn new(cause: ResetCause) -> Self {
        Self {
            cause,
            rails: StdMutex::new([true, true, false, true, false]),
            watchdog_kicks: AtomicU32::new(0),
            reset_requested: AtomicBool::new(false),
        }
    }
}

impl Bsp for SimBsp {
    fn clock_basic_init(&self) {
        log::debug!("bsp: clock init");
    }

    fn watchdog_init(&self) {
        log::debug!("bsp: watchdog armed");
    }

    fn watchdog_kick(&self) {
        self.watchdog_kicks.fetch_add(1, Ordering::Relaxed);
    }

    fn watchdog_set_timeout(&self, timeout_ms: u32) {
        log::debug!("bsp: watchdog timeout {timeout_ms} ms");
    }

    fn reset_get_cause(&self) -> ResetCause {
        self.cause
    }

    fn reset_software(&self) {
        log::warn!("bsp: software reset requested");
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    fn reset_subsystem(&self, subsystem: SubsystemId) {
        log::warn!("bsp: subsystem reset {subsystem:?}");
    }

    fn safe_mode_pin_asserted(&self) -> bool {
        false
    }

    fn power_enter_low_power(&self) {
        log::info!("bsp: entering low-power state");
    }

    fn power_enable_rail(&self, rail: PowerRail) {
        if let Ok(mut rails) = self.rails.lock() {
            rails[rail as usize] = true;
        }
        log::info!("bsp: rail {rail:?} on");
    }

    fn power_disable_rail(&self, rail: PowerRail) {
        if let Ok(mut rails) = self.rails.lock() {
            rails[rail as usize] = false;
        }
        log::info!("bsp: rail {rail:?} off");
    }
}

/// Simulated EPS: slow discharge from the configured state of charge
struct SimEps {
    soc_milli: AtomicU32,
}

impl SimEps {
    fn new(soc: u8) -> Self {
        Self { soc_milli: AtomicU32::new(u32::from(soc) * 1000) }
    }

    fn discharge(&self, milli: u32) {
        let current = self.soc_milli.load(Ordering::SeqCst);
        self.soc_milli.store(current.saturating_sub(milli), Ordering::SeqCst);
    }
}

impl PowerProvider for SimEps {
    fn power(&self) -> PowerSnapshot {
        let soc = (self.soc_milli.load(Ordering::SeqCst) / 1000) as u8;
        PowerSnapshot {
            battery_soc: soc,
            battery_voltage_mv: 3300 + u16::from(soc) * 6,
            ..PowerSnapshot::nominal()
        }
    }
}

impl AttitudeProvider for SimEps {
    fn attitude(&self) -> AttitudeSnapshot {
        AttitudeSnapshot::identity()
    }
}

impl ThermalProvider for SimEps {
    fn thermal(&self) -> ThermalSnapshot {
        ThermalSnapshot::ambient()
    }
}

impl CommsProvider for SimEps {
    fn comms(&self) -> CommsSnapshot {
        CommsSnapshot { rssi_dbm: -82, link_margin_db: 9, ..CommsSnapshot::default() }
    }
}

/// Beacon sink that logs each transmitted frame
struct LoggingBeaconSink;

impl BeaconSink for LoggingBeaconSink {
    fn transmit(&self, frame: &[u8; BEACON_FRAME_SIZE]) {
        let callsign = String::from_utf8_lossy(&frame[0..8]);
        log::info!(
            "beacon: {} seq {} mode {} soc {}%",
            callsign.trim_end(),
            u16::from_le_bytes([frame[10], frame[11]]),
            frame[16],
            frame[24],
        );
    }
}

fn send_ping(core: &FlightCore) {
    let mut tc = core.codec.build_tc(apid::SYSTEM, pus::TEST, 1);
    tc.finalize();
    let mut wire = [0u8; 64];
    let written = tc.serialize(&mut wire);
    if core.telecommand.submit_raw(&wire[..written]).is_err() {
        log::warn!("ground: ping dropped at ingress");
    }
}

fn send_mode_change(core: &FlightCore, target: SystemMode) {
    let mut tc = core.codec.build_tc(apid::SYSTEM, pus::FUNCTION_MGMT, 1);
    if tc.set_data(&[target as u8]).is_err() {
        return;
    }
    tc.finalize();
    let mut wire = [0u8; 64];
    let written = tc.serialize(&mut wire);
    let _ = core.telecommand.submit_raw(&wire[..written]);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // Persistent record as it would be found in backup RAM.
    let mut record = BootRecord::reinitialized();
    record.reset_count_watchdog = args.watchdog_history;
    record.seal();

    let bsp = Arc::new(SimBsp::new(args.reset_cause.into()));
    let report = boot::run(&mut record, bsp.as_ref());
    log::info!(
        "booted: cause {:?}, mode {}, boot #{}",
        report.cause,
        report.mode.name(),
        report.boot_count
    );

    let eps = Arc::new(SimEps::new(args.battery_soc));
    let clock = Arc::new(SystemClock::new());
    let core = FlightCore::start(
        report,
        Arc::new(Mutex::new(record)),
        bsp.clone(),
        clock,
        Peripherals {
            power: eps.clone(),
            attitude: eps.clone(),
            thermal: eps.clone(),
            comms: eps.clone(),
            beacon_sink: Some(Arc::new(LoggingBeaconSink)),
        },
        &args.callsign,
    );

    // The scheduler driver, standing in for the RTOS task.
    let driver_core = core.clone();
    let _driver = Ticker::spawn(Duration::from_millis(u64::from(SCHED_TICK_MS)), move || {
        driver_core.scheduler_step(SCHED_TICK_MS);
    });

    // Ground-station script: ping early, command NOMINAL if we are in SAFE,
    // drain the downlink every second.
    let mut pinged = false;
    let mut commanded = false;
    for second in 0..args.duration_s {
        std::thread::sleep(Duration::from_secs(1));
        eps.discharge(50);

        if second >= 1 && !pinged {
            log::info!("ground: ping");
            send_ping(&core);
            pinged = true;
        }
        if second >= 3 && !commanded && core.mode.current() == SystemMode::Safe {
            log::info!("ground: commanding NOMINAL");
            send_mode_change(&core, SystemMode::Nominal);
            commanded = true;
        }

        let mut drained = 0;
        while let Some(packet) = core.telemetry.dequeue_packet() {
            drained += 1;
            log::debug!(
                "downlink: apid {} svc {}/{} len {}",
                packet.primary.apid(),
                packet.secondary.service_type,
                packet.secondary.service_subtype,
                packet.total_length(),
            );
        }
        log::info!(
            "t+{:>3}s mode {} queue drained {} events {}",
            second + 1,
            core.mode.current().name(),
            drained,
            core.events.count(),
        );
    }

    let tc_stats = core.telecommand.stats();
    let tm_stats = core.telemetry.stats();
    let summary = serde_json::json!({
        "mode": core.mode.current().name(),
        "uptime_s": core.time.uptime_seconds(),
        "boot_count": core.boot.boot_count,
        "telecommand": {
            "accepted": tc_stats.accepted,
            "executed": tc_stats.executed,
            "rejected": tc_stats.rejected,
        },
        "telemetry": {
            "generated": tm_stats.packets_generated,
            "sent": tm_stats.packets_sent,
            "overflows": tm_stats.queue_overflows,
        },
        "beacon_tx": core.beacon.tx_count(),
        "events": core.events.count(),
        "active_faults": core.fdir.active_fault_count(),
        "watchdog_kicks": bsp.watchdog_kicks.load(Ordering::Relaxed),
        "rails": bsp.rails.lock().map(|rails| rails.to_vec()).unwrap_or_default(),
        "reset_requested": bsp.reset_requested.load(Ordering::SeqCst),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{text}"),
        Err(error) => log::error!("summary serialization failed: {error}"),
    }
}
