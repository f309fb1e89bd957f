//! System assembly and startup
//!
//! The hosted equivalent of the RTOS start routine: after the boot
//! sequencer has produced its report, [`FlightCore::start`] constructs every
//! service in a fixed order, wires the cross-component references, and
//! registers the periodic jobs. A single driver (task or [`crate::osal::Ticker`])
//! then calls [`FlightCore::scheduler_step`] at the 10 ms tick.

use std::sync::Arc;

use crate::beacon::{Beacon, BeaconSink};
use crate::boot::{BootRecord, BootReport};
use crate::bsp::Bsp;
use crate::ccsds::Codec;
use crate::events::EventLog;
use crate::fdir::FdirEngine;
use crate::health::HealthMonitor;
use crate::mode::ModeManager;
use crate::osal::{Clock, Mutex, Timeout};
use crate::power::PowerMonitor;
use crate::providers::{AttitudeProvider, CommsProvider, PowerProvider, ThermalProvider};
use crate::sched::Scheduler;
use crate::telecommand::{Dispatcher, TcServices};
use crate::telemetry::{Telemetry, TmSources};
use crate::time::TimeService;
use crate::types::SubsystemId;

/// Driver tick period in milliseconds
pub const SCHED_TICK_MS: u32 = 10;

/// External subsystem connections injected at startup
pub struct Peripherals {
    /// EPS snapshot source
    pub power: Arc<dyn PowerProvider>,
    /// ADCS snapshot source
    pub attitude: Arc<dyn AttitudeProvider>,
    /// Temperature snapshot source
    pub thermal: Arc<dyn ThermalProvider>,
    /// Radio statistics source
    pub comms: Arc<dyn CommsProvider>,
    /// Beacon radio, if present
    pub beacon_sink: Option<Arc<dyn BeaconSink>>,
}

impl std::fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripherals").finish_non_exhaustive()
    }
}

/// The assembled flight core
pub struct FlightCore {
    /// Monotonic clock every service reads
    pub clock: Arc<dyn Clock>,
    /// Board support collaborator
    pub bsp: Arc<dyn Bsp>,
    /// On-board event log
    pub events: Arc<EventLog>,
    /// Time service
    pub time: Arc<TimeService>,
    /// Mode manager
    pub mode: Arc<ModeManager>,
    /// Health monitor
    pub health: Arc<HealthMonitor>,
    /// Fault engine
    pub fdir: Arc<FdirEngine>,
    /// EPS watcher
    pub power: Arc<PowerMonitor>,
    /// CCSDS packet factory
    pub codec: Arc<Codec>,
    /// Telemetry pipeline
    pub telemetry: Arc<Telemetry>,
    /// Telecommand dispatcher
    pub telecommand: Arc<Dispatcher>,
    /// Health beacon
    pub beacon: Arc<Beacon>,
    /// Summary of the boot that started this core
    pub boot: BootReport,
    /// Persistent record shared with the boot sequencer and FDIR
    pub persistent: Arc<Mutex<BootRecord>>,
    sched: Mutex<Scheduler>,
}

impl std::fmt::Debug for FlightCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightCore").field("boot", &self.boot).finish_non_exhaustive()
    }
}

impl FlightCore {
    /// Construct every service and register the periodic job set
    ///
    /// Initialization order is deterministic and mirrors the dependency
    /// graph: event log and time first, then mode, FDIR, the comms stack,
    /// and finally the job table.
    pub fn start(
        boot: BootReport,
        persistent: Arc<Mutex<BootRecord>>,
        bsp: Arc<dyn Bsp>,
        clock: Arc<dyn Clock>,
        peripherals: Peripherals,
        callsign: &str,
    ) -> Arc<Self> {
        let events = Arc::new(EventLog::new(clock.clone()));
        let time = Arc::new(TimeService::new(clock.clone()));
        let health = Arc::new(HealthMonitor::new(clock.clone(), events.clone()));
        let mode = Arc::new(ModeManager::new(boot.mode, clock.clone()));
        let fdir = Arc::new(FdirEngine::new(
            clock.clone(),
            events.clone(),
            mode.clone(),
            bsp.clone(),
            boot,
            persistent.clone(),
        ));
        let codec = Arc::new(Codec::new(time.clone()));

        let sources = TmSources {
            mode: mode.clone(),
            time: time.clone(),
            health: health.clone(),
            power: peripherals.power.clone(),
            attitude: peripherals.attitude.clone(),
            thermal: peripherals.thermal.clone(),
            comms: peripherals.comms.clone(),
            boot,
        };
        let telemetry = Arc::new(Telemetry::new(codec.clone(), time.clone(), sources.clone()));
        let telecommand = Arc::new(Dispatcher::new(
            codec.clone(),
            events.clone(),
            TcServices {
                mode: mode.clone(),
                telemetry: telemetry.clone(),
                time: time.clone(),
                persistent: persistent.clone(),
            },
        ));
        let beacon = Arc::new(Beacon::new(
            callsign,
            sources,
            fdir.clone(),
            peripherals.beacon_sink.clone(),
        ));
        let power = Arc::new(PowerMonitor::new(
            peripherals.power.clone(),
            fdir.clone(),
            mode.clone(),
        ));

        events.info(SubsystemId::Boot, boot.mode.name());

        let core = Arc::new(Self {
            clock,
            bsp,
            events,
            time,
            mode,
            health,
            fdir,
            power,
            codec,
            telemetry,
            telecommand,
            beacon,
            boot,
            persistent,
            sched: Mutex::new(Scheduler::new()),
        });
        core.register_jobs();
        core
    }

    fn register_jobs(&self) {
        let Ok(mut sched) = self.sched.lock(Timeout::Forever) else {
            return;
        };

        {
            let mode = self.mode.clone();
            let events = self.events.clone();
            sched.register_periodic("mode", 200, move || {
                if let Some(transition) = mode.process() {
                    use core::fmt::Write;
                    let mut message: heapless::String<32> = heapless::String::new();
                    let _ = write!(
                        message,
                        "{} -> {}",
                        transition.from.name(),
                        transition.to.name()
                    );
                    events.info(SubsystemId::Mode, &message);
                }
            });
        }
        {
            let health = self.health.clone();
            sched.register_periodic("health", 200, move || health.periodic());
        }
        {
            let fdir = self.fdir.clone();
            sched.register_periodic("fdir", 200, move || fdir.periodic());
        }
        {
            let power = self.power.clone();
            sched.register_periodic("eps", 1000, move || power.periodic());
        }
        {
            let telecommand = self.telecommand.clone();
            sched.register_periodic("telecommand", 50, move || telecommand.periodic());
        }
        {
            let telemetry = self.telemetry.clone();
            sched.register_periodic("telemetry", 200, move || telemetry.periodic());
        }
        {
            let beacon = self.beacon.clone();
            sched.register_periodic("beacon", 1000, move || beacon.periodic());
        }
        {
            let bsp = self.bsp.clone();
            sched.register_periodic("watchdog", 100, move || bsp.watchdog_kick());
        }
    }

    /// Advance the cooperative scheduler; the driver calls this every tick
    pub fn scheduler_step(&self, elapsed_ms: u32) {
        if let Ok(mut sched) = self.sched.lock(Timeout::Forever) {
            sched.step(elapsed_ms);
        }
    }

    /// Number of registered periodic jobs
    pub fn job_count(&self) -> usize {
        self.sched
            .lock(Timeout::Forever)
            .map(|sched| sched.job_count())
            .unwrap_or(0)
    }
}
