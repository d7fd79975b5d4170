use super::common::{Position, Velocity};
use crate::hal::SensorSnapshot;
use crate::mode_control::{ControlParameters, MissionMode, ThreatLevel};
use strum_macros::Display;
use tokio::{sync::RwLock, time::Instant};

/// Safety-level flight mode. Anything but `Protection` preempts the mission behavior.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Display, serde::Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    /// Normal operation, the mission mode drives navigation.
    Protection,
    /// Degraded GPS: horizontal targeting is suspended.
    AltitudeHold,
    /// Controlled descent in progress, navigation output is ignored.
    EmergencyLand,
    /// Landed and disarmed. Terminal.
    Disarmed,
}

impl FlightMode {
    /// `EmergencyLand` and `Disarmed` can not be left once entered.
    pub fn is_terminal(self) -> bool { matches!(self, FlightMode::EmergencyLand | FlightMode::Disarmed) }
}

/// The single mutable aggregate all tasks read and write through [`FlightStateStore`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlightState {
    armed: bool,
    mission_mode: MissionMode,
    flight_mode: FlightMode,
    threat_level: ThreatLevel,
    position: Position,
    velocity: Velocity,
    gps_lock: bool,
    satellites: u8,
    battery_voltage: f64,
    battery_pct: f64,
    consecutive_hw_failures: u32,
    #[serde(skip)]
    last_contact: Instant,
}

impl FlightState {
    /// Altitude below which the aircraft counts as on the ground.
    pub const GROUND_LEVEL: f64 = 0.2;

    pub fn new(position: Position) -> Self {
        Self {
            armed: false,
            mission_mode: MissionMode::Patrol,
            flight_mode: FlightMode::Protection,
            threat_level: ThreatLevel::Green,
            position,
            velocity: Velocity::default(),
            gps_lock: false,
            satellites: 0,
            battery_voltage: 0.0,
            battery_pct: 100.0,
            consecutive_hw_failures: 0,
            last_contact: Instant::now(),
        }
    }

    pub fn armed(&self) -> bool { self.armed }
    pub fn mission_mode(&self) -> MissionMode { self.mission_mode }
    pub fn flight_mode(&self) -> FlightMode { self.flight_mode }
    pub fn threat_level(&self) -> ThreatLevel { self.threat_level }
    pub fn position(&self) -> &Position { &self.position }
    pub fn velocity(&self) -> &Velocity { &self.velocity }
    pub fn gps_lock(&self) -> bool { self.gps_lock }
    pub fn satellites(&self) -> u8 { self.satellites }
    pub fn battery_voltage(&self) -> f64 { self.battery_voltage }
    pub fn battery_pct(&self) -> f64 { self.battery_pct }
    pub fn consecutive_hw_failures(&self) -> u32 { self.consecutive_hw_failures }
    pub fn last_contact(&self) -> Instant { self.last_contact }

    /// Control parameters are never stored, they follow the threat level.
    pub fn control_params(&self) -> ControlParameters { ControlParameters::for_threat(self.threat_level) }

    pub fn is_airborne(&self) -> bool { self.armed && self.position.alt() > Self::GROUND_LEVEL }

    /// Commits one sensor snapshot. Position, velocity, battery and GPS are
    /// replaced together so no reader sees fields from different samples.
    pub fn apply_sensors(&mut self, snapshot: &SensorSnapshot, now: Instant) {
        self.position = snapshot.position;
        self.velocity = snapshot.velocity;
        self.battery_voltage = snapshot.battery_voltage;
        self.battery_pct = snapshot.battery_pct;
        self.gps_lock = snapshot.gps_lock;
        self.satellites = snapshot.satellites;
        self.record_link_success(now);
    }

    pub fn record_link_success(&mut self, now: Instant) {
        self.consecutive_hw_failures = 0;
        self.last_contact = now;
    }

    /// Counts a failed hardware exchange and returns the new streak length.
    pub fn record_link_failure(&mut self) -> u32 {
        self.consecutive_hw_failures = self.consecutive_hw_failures.saturating_add(1);
        self.consecutive_hw_failures
    }

    pub fn apply_threat(&mut self, level: ThreatLevel) {
        self.threat_level = level;
        self.mission_mode = MissionMode::from(level);
    }

    pub fn override_mission_mode(&mut self, mode: MissionMode) { self.mission_mode = mode; }

    pub fn set_armed(&mut self, armed: bool) { self.armed = armed; }

    /// Forces altitude hold. Only applies out of `Protection`.
    pub fn force_altitude_hold(&mut self) -> bool {
        if self.flight_mode == FlightMode::Protection {
            self.flight_mode = FlightMode::AltitudeHold;
            return true;
        }
        false
    }

    /// Returns from altitude hold to normal operation.
    pub fn release_altitude_hold(&mut self) -> bool {
        if self.flight_mode == FlightMode::AltitudeHold {
            self.flight_mode = FlightMode::Protection;
            return true;
        }
        false
    }

    /// Enters the emergency landing path and returns the mode it was entered from.
    pub fn enter_emergency_land(&mut self) -> FlightMode {
        let prev = self.flight_mode;
        if prev != FlightMode::Disarmed {
            self.flight_mode = FlightMode::EmergencyLand;
        }
        prev
    }

    pub fn complete_landing(&mut self) {
        self.armed = false;
        self.flight_mode = FlightMode::Disarmed;
        self.velocity = Velocity::default();
    }
}

/// Exclusive-access wrapper around the one [`FlightState`] of the process.
///
/// Every `update` runs under the write lock, so readers always observe the
/// last fully committed snapshot.
#[derive(Debug)]
pub struct FlightStateStore {
    state: RwLock<FlightState>,
}

impl FlightStateStore {
    pub fn new(initial: FlightState) -> Self { Self { state: RwLock::new(initial) } }

    /// Returns a consistent copy of the whole state.
    pub async fn read(&self) -> FlightState { self.state.read().await.clone() }

    /// Applies `f` atomically with respect to all other readers and writers.
    pub async fn update<F, R>(&self, f: F) -> R
    where F: FnOnce(&mut FlightState) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }
}
