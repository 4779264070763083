//! # Acquisition Scheduler
//!
//! The periodic loop of the acquisition context. Each tick:
//!
//! 1. Wait for calibration if the receiver is not calibrated yet
//! 2. Measure the time since the previous tick
//! 3. Read RPM, speed, MAF and throttle; a journey is active while RPM > 0
//! 4. Accumulate fuel economy when both speed and MAF are positive
//! 5. Read time, position and acceleration from the receiver
//! 6. With logging enabled and a journey active, append the sample to the
//!    current drive (opening one if needed)
//!
//! The logging flag is written by the control context; the loop closes the
//! open drive as soon as it sees the flag drop. A drive belongs to the
//! activation it was opened under: once the flag reports a later activation the
//! drive is closed and the next qualifying tick opens a fresh one.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationGate;
use crate::config::Config;
use crate::control::LoggingFlag;
use crate::economy::{instant_economy, FuelAccumulator};
use crate::obd::EngineSource;
use crate::position::{PositionFix, PositionProvider};
use crate::sample::TelemetrySample;
use crate::storage::{LogSession, StorageGateway};

/// Loop timing and economy policy
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub reset_economy_per_drive: bool,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.acquisition.tick_interval(),
            reset_economy_per_drive: config.economy.reset_per_drive,
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub sample: TelemetrySample,
    pub journey_active: bool,
    pub logged: bool,
}

/// Owns the calibration gate, fuel accumulator and log session
pub struct AcquisitionScheduler<E, P> {
    engine: E,
    position: P,
    gate: CalibrationGate,
    economy: FuelAccumulator,
    session: LogSession,
    gateway: Arc<StorageGateway>,
    logging: watch::Receiver<LoggingFlag>,
    logging_live: bool,
    drive_activation: Option<u64>,
    settings: SchedulerSettings,
    last_tick: Option<Instant>,
}

impl<E, P> std::fmt::Debug for AcquisitionScheduler<E, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionScheduler")
            .field("gate", &self.gate)
            .field("economy", &self.economy)
            .field("session", &self.session)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<E: EngineSource, P: PositionProvider> AcquisitionScheduler<E, P> {
    pub fn new(
        engine: E,
        position: P,
        gate: CalibrationGate,
        gateway: Arc<StorageGateway>,
        logging: watch::Receiver<LoggingFlag>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            engine,
            position,
            gate,
            economy: FuelAccumulator::new(),
            session: LogSession::new(),
            gateway,
            logging,
            logging_live: true,
            drive_activation: None,
            settings,
            last_tick: None,
        }
    }

    pub fn session(&self) -> &LogSession {
        &self.session
    }

    pub fn economy(&self) -> &FuelAccumulator {
        &self.economy
    }

    /// Current logging flag; disabled for good once the control side is gone
    fn logging_flag(&self) -> LoggingFlag {
        if self.logging_live {
            *self.logging.borrow()
        } else {
            LoggingFlag::default()
        }
    }

    /// True when the open drive belongs to an earlier activation than `flag`
    fn drive_superseded(&self, flag: LoggingFlag) -> bool {
        self.session.is_open() && self.drive_activation != Some(flag.activation)
    }

    /// Run one acquisition tick
    pub async fn tick(&mut self) -> TickReport {
        if !self.gate.is_calibrated() {
            self.gate.await_calibration(&mut self.position).await;
            self.last_tick = Some(Instant::now());
        }

        let now = Instant::now();
        let elapsed = self.last_tick.map_or(Duration::ZERO, |last| now - last);
        self.last_tick = Some(now);

        self.process(elapsed).await
    }

    /// Steps 3-6 of a tick, with the interval since the previous tick given
    pub(crate) async fn process(&mut self, elapsed: Duration) -> TickReport {
        let engine = self.engine.read_engine().await;
        let journey_active = engine.journey_active();
        let speed = engine.speed_kph.unwrap_or(0);
        let maf = engine.maf.unwrap_or(0.0);
        let flag = self.logging_flag();

        if self.settings.reset_economy_per_drive
            && journey_active
            && flag.enabled
            && (!self.session.is_open() || self.drive_superseded(flag))
        {
            self.economy.reset();
        }

        let instant = if self.economy.accumulate(speed, maf, elapsed) {
            instant_economy(speed, maf)
        } else {
            0.0
        };

        let fix = match self.position.fix().await {
            Ok(fix) => fix,
            Err(e) => {
                warn!("Position unavailable, using system clock: {}", e);
                PositionFix::from_clock(Utc::now())
            }
        };
        let inertial = self.position.inertial().await.unwrap_or_default();

        let sample = TelemetrySample {
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            satellites: fix.satellites,
            rpm: engine.rpm.unwrap_or(0),
            speed_kph: speed,
            maf,
            throttle: engine.throttle.unwrap_or(0),
            instant_economy: instant,
            avg_economy: self.economy.average(),
            accel_x: inertial.accel_x,
            accel_y: inertial.accel_y,
        };

        debug!(
            "RPM {} speed {} km/h MAF {:.2} g/s throttle {}% | {:.2} mpg (avg {:.2}) | {} {:.7},{:.7} {} | accel {},{}",
            sample.rpm,
            sample.speed_kph,
            sample.maf,
            sample.throttle,
            sample.instant_economy,
            sample.avg_economy,
            sample.time_of_day(),
            sample.latitude,
            sample.longitude,
            if sample.has_satellite_fix() { "fix" } else { "dead reckoning" },
            sample.accel_x,
            sample.accel_y,
        );

        let logged = self.persist(&sample, journey_active, flag).await;
        TickReport {
            sample,
            journey_active,
            logged,
        }
    }

    async fn persist(&mut self, sample: &TelemetrySample, journey_active: bool, flag: LoggingFlag) -> bool {
        if !flag.enabled || self.drive_superseded(flag) {
            self.close_session().await;
        }
        if !flag.enabled || !journey_active {
            return false;
        }

        match self.session.ensure_open(&self.gateway, &sample.timestamp).await {
            Ok(true) => self.drive_activation = Some(flag.activation),
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to open log file, retrying next tick: {}", e);
                return false;
            }
        }

        match self.session.append(&self.gateway, sample).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping sample: {}", e);
                false
            }
        }
    }

    /// Close the open drive, if any
    pub async fn close_session(&mut self) {
        if !self.session.is_open() {
            return;
        }
        self.drive_activation = None;
        if let Err(e) = self.session.close(&self.gateway).await {
            warn!("Failed to close log file cleanly: {}", e);
        }
    }

    /// Run until `shutdown` turns true, then close the open drive
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = self.gate.await_calibration(&mut self.position) => {}
            _ = shutdown.changed() => {
                info!("Shutdown before calibration completed");
                return;
            }
        }

        info!("Starting acquisition loop every {:?}", self.settings.tick_interval);
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.last_tick = Some(Instant::now());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.logged {
                        debug!("Sample logged");
                    }
                }

                changed = self.logging.changed(), if self.logging_live => {
                    if changed.is_err() {
                        warn!("Logging control went away; treating logging as disabled");
                        self.logging_live = false;
                        self.close_session().await;
                    } else {
                        let flag = *self.logging.borrow_and_update();
                        if !flag.enabled || self.drive_superseded(flag) {
                            self.close_session().await;
                        }
                    }
                }

                _ = shutdown.changed() => {
                    info!("Acquisition loop stopping");
                    self.close_session().await;
                    break;
                }
            }
        }
    }
}
