use super::periodic::{DriftPolicy, PeriodicScheduler, TaskStats};
use crate::config::{ConfigurationError, EscortConfig};
use crate::flight_control::{
    ChannelSink, CollisionDetector, ControlTask, EmergencyError, FlightMode, FlightState, LandingOutcome,
    LogSink, NavCommand, NavigationTask, Navigator, NoCollisionSensor, SafetyMonitor, SafetyVerdict,
    TelemetryRecord, TelemetrySink, TelemetryTask, common::Position,
};
use crate::hal::{FlightHal, HalBackend, HardwareError};
use crate::keychain::Keychain;
use crate::mode_control::{MissionMode, OperatorAlert, ProtectionTarget, ThreatLevel, ThreatTransition, Waypoint};
use crate::{error, info, warn};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use strum_macros::Display;
use tokio::{
    sync::{Mutex, RwLock, RwLockReadGuard, broadcast, watch},
    task::JoinHandle,
    time::{Instant, timeout},
};
use tokio_util::sync::CancellationToken;

/// Errors returned by the operator command surface.
#[derive(Debug, Display)]
pub enum CommandError {
    Configuration(ConfigurationError),
    /// Intake is closed, the controller is shutting down.
    ShuttingDown,
    /// The aircraft is on the emergency landing path or disarmed for good.
    Terminal,
    Hardware(HardwareError),
    Landing(EmergencyError),
}

impl std::error::Error for CommandError {}

impl From<ConfigurationError> for CommandError {
    fn from(value: ConfigurationError) -> Self { CommandError::Configuration(value) }
}

impl From<HardwareError> for CommandError {
    fn from(value: HardwareError) -> Self { CommandError::Hardware(value) }
}

impl From<EmergencyError> for CommandError {
    fn from(value: EmergencyError) -> Self { CommandError::Landing(value) }
}

/// Summary handed back by [`Orchestrator::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    /// Result of the landing driven by the shutdown, `None` if none was needed.
    pub landing: Option<Result<LandingOutcome, EmergencyError>>,
    pub armed: bool,
    pub flight_mode: FlightMode,
    /// Timing records of the joined periodic tasks.
    pub tasks: Vec<TaskStats>,
}

/// Owns the periodic tasks and exposes the operator command surface.
pub struct Orchestrator {
    keychain: Keychain,
    config: EscortConfig,
    /// Cleared once shutdown begins; no command is admitted afterwards.
    accepting: AtomicBool,
    /// Commands hold it shared, shutdown takes it exclusively to drain them.
    intake: RwLock<()>,
    c_tok: CancellationToken,
    handles: Mutex<Vec<JoinHandle<TaskStats>>>,
    verdict: watch::Receiver<SafetyVerdict>,
    nav: watch::Receiver<NavCommand>,
    telemetry: ChannelSink,
}

impl Orchestrator {
    const TELEMETRY_BUFFER: usize = 64;

    /// Seeds the flight state from a first sensor read and starts all periodic tasks.
    pub async fn start(config: EscortConfig, hal: HalBackend) -> Self {
        Self::start_with_detector(config, hal, Box::new(NoCollisionSensor)).await
    }

    pub async fn start_with_detector(
        config: EscortConfig,
        hal: HalBackend,
        detector: Box<dyn CollisionDetector>,
    ) -> Self {
        info!("Starting escort controller on the {} backend.", hal.backend_name());
        let first_read = timeout(config.hw_timeout, hal.read_sensors()).await.map_err(HardwareError::from);
        let seed = match first_read {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) | Err(e) => {
                warn!("Initial sensor read failed: {e}. Starting from the origin.");
                None
            }
        };
        let home = seed.map_or_else(|| Position::new(0.0, 0.0, 0.0), |s| s.position);
        let keychain = Keychain::new(&config, hal, home);
        if let Some(snapshot) = seed {
            let now = Instant::now();
            keychain.store().update(|state| state.apply_sensors(&snapshot, now)).await;
        }

        let (nav_tx, nav_rx) = watch::channel(NavCommand::idle());
        let (verdict_tx, verdict_rx) = watch::channel(SafetyVerdict::NOMINAL);
        let telemetry = ChannelSink::new(broadcast::channel::<TelemetryRecord>(Self::TELEMETRY_BUFFER).0);
        let c_tok = CancellationToken::new();
        let rates = config.rates;

        let control = ControlTask::new(
            keychain.store(),
            keychain.hal(),
            nav_rx.clone(),
            config.hw_timeout,
            config.thresholds.max_consecutive_hw_failures,
        );
        let navigation = NavigationTask::new(
            keychain.store(),
            keychain.mission(),
            detector,
            Navigator::new(config.orbit_period, &config.thresholds),
            nav_tx,
        );
        let safety = SafetyMonitor::new(
            keychain.store(),
            keychain.hal(),
            keychain.landing(),
            config.thresholds,
            config.hw_timeout,
            keychain.alert_tx(),
            verdict_tx,
        );
        let sinks: Vec<Box<dyn TelemetrySink>> = vec![
            Box::new(LogSink::new(config.telemetry_log_every)),
            Box::new(telemetry.clone()),
        ];
        let telemetry_task =
            TelemetryTask::new(keychain.store(), keychain.mission(), verdict_rx.clone(), nav_rx.clone(), sinks);

        let handles = vec![
            PeriodicScheduler::new(rates.control_period(), DriftPolicy::Skip).spawn(control, c_tok.child_token()),
            PeriodicScheduler::new(rates.nav_period(), DriftPolicy::Skip).spawn(navigation, c_tok.child_token()),
            PeriodicScheduler::new(rates.safety_period(), DriftPolicy::Skip).spawn(safety, c_tok.child_token()),
            PeriodicScheduler::new(rates.telemetry_period(), DriftPolicy::Delay)
                .spawn(telemetry_task, c_tok.child_token()),
        ];

        Self {
            keychain,
            config,
            accepting: AtomicBool::new(true),
            intake: RwLock::new(()),
            c_tok,
            handles: Mutex::new(handles),
            verdict: verdict_rx,
            nav: nav_rx,
            telemetry,
        }
    }

    pub fn keychain(&self) -> &Keychain { &self.keychain }

    pub async fn state(&self) -> FlightState { self.keychain.store().read().await }

    pub fn verdict(&self) -> SafetyVerdict { *self.verdict.borrow() }

    pub fn nav_command(&self) -> NavCommand { *self.nav.borrow() }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryRecord> { self.telemetry.subscribe() }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<OperatorAlert> { self.keychain.alerts() }

    pub fn is_accepting(&self) -> bool { self.accepting.load(Ordering::Acquire) }

    async fn admit(&self) -> Result<RwLockReadGuard<'_, ()>, CommandError> {
        if !self.is_accepting() {
            return Err(CommandError::ShuttingDown);
        }
        let guard = self.intake.read().await;
        // shutdown may have begun while waiting for the lock
        if !self.is_accepting() {
            return Err(CommandError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Replaces the protection target. Invalid targets leave the previous one in effect.
    ///
    /// # Arguments
    /// - `target`: The new target, an empty identifier disables protection.
    ///
    /// # Errors
    /// - [`ConfigurationError::NonPositiveRadius`] or [`ConfigurationError::InvalidCoordinates`]
    ///   for a malformed target.
    /// - [`CommandError::ShuttingDown`] once intake is closed.
    pub async fn set_protection_target(&self, target: ProtectionTarget) -> Result<(), CommandError> {
        let _intake = self.admit().await?;
        self.keychain.mission().set_target(target).await?;
        Ok(())
    }

    /// Applies a new threat level to the mission state machine.
    ///
    /// # Arguments
    /// - `level`: The reported threat level, any level may follow any other.
    ///
    /// # Returns
    /// - The resulting [`ThreatTransition`], including whether an omega maneuver was queued.
    pub async fn update_threat_level(&self, level: ThreatLevel) -> Result<ThreatTransition, CommandError> {
        let _intake = self.admit().await?;
        Ok(self.keychain.mission().update_threat(level).await)
    }

    /// Threat update carrying the observed threat position.
    ///
    /// # Arguments
    /// - `level`: The reported threat level.
    /// - `location`: Where the threat was observed. From `ORANGE` up the orbit
    ///   point is placed between the target and this position.
    ///
    /// # Errors
    /// - [`ConfigurationError::InvalidCoordinates`] if `location` is not a valid fix.
    pub async fn report_threat(
        &self,
        level: ThreatLevel,
        location: Position,
    ) -> Result<ThreatTransition, CommandError> {
        if !location.is_valid_fix() {
            return Err(ConfigurationError::InvalidCoordinates.into());
        }
        let _intake = self.admit().await?;
        Ok(self.keychain.mission().report_threat(level, Some(location)).await)
    }

    /// Forces a mission mode until the next threat update re-derives it.
    pub async fn override_mission_mode(&self, mode: MissionMode) -> Result<(), CommandError> {
        let _intake = self.admit().await?;
        self.keychain.mission().override_mission_mode(mode).await;
        Ok(())
    }

    /// Arms the aircraft and commands a vertical climb to `altitude`.
    ///
    /// # Arguments
    /// - `altitude`: Climb target in meters, within `[min_safe_altitude, max_altitude]`.
    ///
    /// # Errors
    /// - [`ConfigurationError::AltitudeOutOfRange`] for an altitude outside the band.
    /// - [`CommandError::Terminal`] if the aircraft is landing or disarmed for good,
    ///   also when that happened while the arm call was in flight.
    /// - [`CommandError::Hardware`] if arming or the climb command fails or times out.
    ///
    /// # Side Effects
    /// - An aircraft armed by the hardware while a landing took over is disarmed again.
    pub async fn arm_and_takeoff(&self, altitude: f64) -> Result<(), CommandError> {
        let _intake = self.admit().await?;
        let ceiling = self.config.thresholds.max_altitude;
        if !(self.config.min_safe_altitude..=ceiling).contains(&altitude) {
            return Err(ConfigurationError::AltitudeOutOfRange.into());
        }
        let store = self.keychain.store();
        let hal = self.keychain.hal();
        if store.read().await.flight_mode().is_terminal() {
            return Err(CommandError::Terminal);
        }
        timeout(self.config.hw_timeout, hal.arm()).await.map_err(HardwareError::from)??;
        // a landing may have taken over while the arm call was in flight
        let armed = store
            .update(|s| {
                let terminal = s.flight_mode().is_terminal();
                if !terminal {
                    s.set_armed(true);
                }
                (!terminal).then(|| s.clone())
            })
            .await;
        let Some(state) = armed else {
            warn!("Landing took over while arming, disarming again.");
            let disarmed =
                timeout(self.config.hw_timeout, hal.disarm()).await.map_err(HardwareError::from).and_then(|res| res);
            if let Err(e) = disarmed {
                error!("Disarm after the aborted takeoff failed: {e}");
            }
            return Err(CommandError::Terminal);
        };
        let speed = state.control_params().max_speed() * Navigator::ALTITUDE_FACTOR;
        let target = state.position().at_alt(altitude);
        timeout(self.config.hw_timeout, hal.send_position_command(target, speed))
            .await
            .map_err(HardwareError::from)??;
        info!("Armed, climbing to {altitude:.1}m at {speed:.1}m/s.");
        Ok(())
    }

    /// Flies to `position`, ahead of the protective orbit. Safety reactions,
    /// collision avoidance and the omega maneuver still take precedence.
    ///
    /// # Arguments
    /// - `position`: Destination, its altitude within `[min_safe_altitude, max_altitude]`.
    /// - `speed`: Requested speed in m/s, capped at the current threat level's maximum.
    ///   `None` flies at that maximum.
    ///
    /// # Errors
    /// - [`ConfigurationError::InvalidCoordinates`], [`ConfigurationError::AltitudeOutOfRange`]
    ///   or [`ConfigurationError::InvalidThreshold`] for a malformed request.
    /// - [`CommandError::Terminal`] while landing or after the final disarm.
    /// - [`HardwareError::NotArmed`] before takeoff.
    ///
    /// # Side Effects
    /// - Replaces any waypoint still pending. It is dropped once reached.
    pub async fn navigate_to(&self, position: Position, speed: Option<f64>) -> Result<(), CommandError> {
        let waypoint = Waypoint::new(position, speed);
        waypoint.validate(self.config.min_safe_altitude, self.config.thresholds.max_altitude)?;
        let _intake = self.admit().await?;
        let state = self.keychain.store().read().await;
        if state.flight_mode().is_terminal() {
            return Err(CommandError::Terminal);
        }
        if !state.armed() {
            return Err(HardwareError::NotArmed.into());
        }
        self.keychain.mission().set_waypoint(waypoint).await;
        Ok(())
    }

    /// Operator triggered emergency landing. Also resumes a landing that
    /// previously failed on the hardware.
    ///
    /// # Returns
    /// - [`LandingOutcome::AlreadyDisarmed`] if there was nothing left to land.
    pub async fn emergency_land(&self) -> Result<LandingOutcome, CommandError> {
        let _intake = self.admit().await?;
        Ok(self.keychain.landing().engage("operator request").await?)
    }

    /// Stops intake, lands if the aircraft is armed, then stops and joins all tasks.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("Shutdown requested, command intake closed.");
        }
        let _intake = self.intake.write().await;
        let store = self.keychain.store();
        let state = store.read().await;

        let landing = if state.armed() || state.flight_mode() == FlightMode::EmergencyLand {
            let res = self.keychain.landing().engage("shutdown").await;
            if let Err(e) = &res {
                error!("Shutdown landing failed: {e}");
            }
            Some(res)
        } else {
            None
        };

        self.c_tok.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        let mut tasks = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(stats) => tasks.push(stats),
                Err(e) => error!("Periodic task ended abnormally: {e}"),
            }
        }

        let last = store.read().await;
        if last.armed() {
            error!("Controller stopped with the aircraft still armed.");
        } else {
            info!("Controller stopped, aircraft disarmed.");
        }
        ShutdownReport { landing, armed: last.armed(), flight_mode: last.flight_mode(), tasks }
    }
}
