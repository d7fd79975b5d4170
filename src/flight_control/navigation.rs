use super::{
    collision::{CollisionAssessment, CollisionDetector},
    common::{
        Position,
        geo::{bearing, destination_point, haversine_distance, orbit_point},
    },
    flight_state::{FlightMode, FlightState, FlightStateStore},
};
use crate::config::SafetyThresholds;
use crate::mode_control::{
    ControlParameters, MissionStateMachine, OmegaLatch, ProtectionTarget, ThreatLevel, Waypoint,
};
use crate::scheduling::PeriodicTask;
use crate::{event, info, warn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use strum_macros::Display;
use tokio::{sync::watch, time::Instant};

/// What the navigation output asks the aircraft to do.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Display, serde::Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SteerAction {
    /// No horizontal correction.
    Hold,
    /// Outside the hysteresis band, closing in on the orbit.
    Closing,
    /// Inside the hysteresis band, backing off to the orbit.
    BackingOff,
    /// Only the altitude is corrected.
    AltitudeCorrection,
    Omega,
    Avoidance,
    AltitudeHold,
    /// Flying to the operator waypoint.
    Waypoint,
}

/// Latest navigation output, consumed by the control task.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct NavCommand {
    /// Position to command. `None` means no new command is issued.
    pub target: Option<Position>,
    pub speed: f64,
    pub action: SteerAction,
    pub altitude_correction: bool,
    /// Great-circle distance to the protection target, if one is engaged.
    pub distance_to_target: Option<f64>,
    pub collision_risk: bool,
}

impl NavCommand {
    pub fn idle() -> Self {
        Self {
            target: None,
            speed: 0.0,
            action: SteerAction::Hold,
            altitude_correction: false,
            distance_to_target: None,
            collision_risk: false,
        }
    }
}

impl Default for NavCommand {
    fn default() -> Self { Self::idle() }
}

/// Pre-planned one-shot evasive sequence.
///
/// Climbs above the entry point, then visits four points around it at 90°
/// increments, each held for a fixed dwell time.
#[derive(Debug, Clone)]
pub struct OmegaManeuver {
    waypoints: Vec<(Position, Duration)>,
    index: usize,
    step_started: Instant,
}

impl OmegaManeuver {
    pub const CLIMB: f64 = 10.0;
    pub const RADIUS: f64 = 11.0;
    pub const DWELL: Duration = Duration::from_millis(500);

    pub fn plan(start: &Position, max_speed: f64, now: Instant) -> Self {
        let alt = start.alt() + Self::CLIMB;
        let climb_time = Duration::from_secs_f64(Self::CLIMB / max_speed.max(f64::EPSILON));
        let mut waypoints = vec![(start.at_alt(alt), climb_time + Self::DWELL)];
        for step in 0..4u8 {
            let point = destination_point(start, f64::from(step) * 90.0, Self::RADIUS).at_alt(alt);
            waypoints.push((point, Self::DWELL));
        }
        Self { waypoints, index: 0, step_started: now }
    }

    /// Returns the waypoint to fly at `now`, or `None` once the sequence is done.
    pub fn advance(&mut self, now: Instant) -> Option<Position> {
        while let Some((point, hold)) = self.waypoints.get(self.index) {
            if now.saturating_duration_since(self.step_started) < *hold {
                return Some(*point);
            }
            self.step_started += *hold;
            self.index += 1;
            event!("Omega step {} reached.", self.index);
        }
        None
    }
}

/// Everything one navigation step depends on.
pub struct NavInputs<'a> {
    pub state: &'a FlightState,
    pub target: Option<&'a ProtectionTarget>,
    pub threat_location: Option<&'a Position>,
    pub omega: &'a OmegaLatch,
    pub waypoint: Option<&'a Waypoint>,
    pub collision: CollisionAssessment,
    pub wall_t: DateTime<Utc>,
    pub mono_t: Instant,
}

/// Computes the next target position from the flight state and mission parameters.
///
/// No commanded altitude ever exceeds the regulatory ceiling.
#[derive(Debug)]
pub struct Navigator {
    orbit_period: Duration,
    omega: Option<OmegaManeuver>,
    ceiling: f64,
    /// Altitude the ceiling descent aims for.
    descent_floor: f64,
    descent_speed: f64,
    /// Set above the ceiling while holding altitude, cleared once at the floor.
    ceiling_descent: bool,
}

impl Navigator {
    /// Half width of the dead band around the orbit radius in meters.
    pub const HYSTERESIS: f64 = 5.0;
    pub const CLOSING_FACTOR: f64 = 0.7;
    pub const BACKING_OFF_FACTOR: f64 = 0.5;
    pub const ALTITUDE_FACTOR: f64 = 0.3;
    /// Altitude deviation tolerated before a correction is commanded.
    pub const ALTITUDE_TOLERANCE: f64 = 2.0;

    pub fn new(orbit_period: Duration, thresholds: &SafetyThresholds) -> Self {
        Self {
            orbit_period,
            omega: None,
            ceiling: thresholds.max_altitude,
            descent_floor: thresholds.max_altitude - thresholds.ceiling_margin,
            descent_speed: thresholds.ceiling_descent_speed,
            ceiling_descent: false,
        }
    }

    pub fn omega_active(&self) -> bool { self.omega.is_some() }

    pub fn compute(&mut self, inputs: &NavInputs<'_>) -> NavCommand {
        let mut cmd = self.steer(inputs);
        if let Some(target) = cmd.target.as_mut().filter(|t| t.alt() > self.ceiling) {
            *target = target.at_alt(self.ceiling);
        }
        cmd
    }

    fn steer(&mut self, inputs: &NavInputs<'_>) -> NavCommand {
        let state = inputs.state;
        let params = state.control_params();

        if !state.armed() || state.flight_mode().is_terminal() {
            self.abort_omega(inputs.omega);
            self.ceiling_descent = false;
            return NavCommand::idle();
        }
        if state.flight_mode() == FlightMode::AltitudeHold {
            self.abort_omega(inputs.omega);
            return self.altitude_hold(state.position(), &params);
        }
        self.ceiling_descent = false;
        if inputs.collision.risk {
            let mut cmd = NavCommand { collision_risk: true, ..NavCommand::idle() };
            if let Some(avoid) = inputs.collision.avoidance_target {
                cmd.target = Some(avoid);
                cmd.speed = params.max_speed();
                cmd.action = SteerAction::Avoidance;
            }
            return cmd;
        }
        if let Some(cmd) = self.omega_step(inputs, &params) {
            return cmd;
        }
        if let Some(waypoint) = inputs.waypoint {
            return NavCommand {
                target: Some(*waypoint.position()),
                speed: waypoint.capped_speed(params.max_speed()),
                action: SteerAction::Waypoint,
                ..NavCommand::idle()
            };
        }
        self.protection(inputs, &params)
    }

    /// Holds the current position, or descends straight down to the floor
    /// while the aircraft is above the ceiling.
    fn altitude_hold(&mut self, current: &Position, params: &ControlParameters) -> NavCommand {
        if current.alt() > self.ceiling {
            if !self.ceiling_descent {
                warn!("Holding altitude above the ceiling, descending to {:.1}m.", self.descent_floor);
            }
            self.ceiling_descent = true;
        } else if current.alt() <= self.descent_floor + Self::ALTITUDE_TOLERANCE {
            self.ceiling_descent = false;
        }
        let (target, speed) = if self.ceiling_descent {
            (current.at_alt(self.descent_floor), self.descent_speed)
        } else {
            (*current, params.max_speed() * Self::ALTITUDE_FACTOR)
        };
        NavCommand { target: Some(target), speed, action: SteerAction::AltitudeHold, ..NavCommand::idle() }
    }

    fn omega_step(&mut self, inputs: &NavInputs<'_>, params: &ControlParameters) -> Option<NavCommand> {
        if self.omega.is_none() && inputs.omega.take() {
            info!("Omega maneuver started at {}.", inputs.state.position());
            self.omega = Some(OmegaManeuver::plan(inputs.state.position(), params.max_speed(), inputs.mono_t));
        }
        let maneuver = self.omega.as_mut()?;
        if let Some(point) = maneuver.advance(inputs.mono_t) {
            return Some(NavCommand {
                target: Some(point),
                speed: params.max_speed(),
                action: SteerAction::Omega,
                ..NavCommand::idle()
            });
        }
        info!("Omega maneuver complete.");
        self.omega = None;
        inputs.omega.complete();
        None
    }

    fn abort_omega(&mut self, latch: &OmegaLatch) {
        if self.omega.take().is_some() {
            warn!("Omega maneuver aborted.");
        }
        if !latch.is_idle() {
            latch.complete();
        }
    }

    /// Protective orbit with a hysteresis band plus threat dependent altitude.
    fn protection(&self, inputs: &NavInputs<'_>, params: &ControlParameters) -> NavCommand {
        let Some(target) = inputs.target.filter(|t| t.is_engaged()) else {
            return NavCommand::idle();
        };
        let current = inputs.state.position();
        let radius = params.orbit_radius();
        let d = haversine_distance(current, target.position());

        let orbit = match inputs.threat_location {
            Some(threat) if inputs.state.threat_level() >= ThreatLevel::Orange => {
                destination_point(target.position(), bearing(target.position(), threat), radius)
            }
            _ => orbit_point(target.position(), radius, inputs.wall_t, self.orbit_period),
        };

        let (action, speed) = if d > radius + Self::HYSTERESIS {
            (SteerAction::Closing, params.max_speed() * Self::CLOSING_FACTOR)
        } else if d < radius - Self::HYSTERESIS {
            (SteerAction::BackingOff, params.max_speed() * Self::BACKING_OFF_FACTOR)
        } else {
            (SteerAction::Hold, 0.0)
        };

        let target_alt = params.target_altitude();
        let altitude_correction = (current.alt() - target_alt).abs() > Self::ALTITUDE_TOLERANCE;

        let cmd_target = match (action, altitude_correction) {
            (SteerAction::Hold, false) => None,
            (SteerAction::Hold, true) => Some(current.at_alt(target_alt)),
            (_, true) => Some(orbit.at_alt(target_alt)),
            (_, false) => Some(orbit.at_alt(current.alt())),
        };
        let (action, speed) = if action == SteerAction::Hold && altitude_correction {
            (SteerAction::AltitudeCorrection, params.max_speed() * Self::ALTITUDE_FACTOR)
        } else {
            (action, speed)
        };
        NavCommand {
            target: cmd_target,
            speed,
            action,
            altitude_correction,
            distance_to_target: Some(d),
            collision_risk: false,
        }
    }
}

/// Periodic wrapper publishing the navigator's output on a watch channel.
pub struct NavigationTask {
    store: Arc<FlightStateStore>,
    mission: Arc<MissionStateMachine>,
    detector: Box<dyn CollisionDetector>,
    navigator: Navigator,
    output: watch::Sender<NavCommand>,
}

impl NavigationTask {
    pub fn new(
        store: Arc<FlightStateStore>,
        mission: Arc<MissionStateMachine>,
        detector: Box<dyn CollisionDetector>,
        navigator: Navigator,
        output: watch::Sender<NavCommand>,
    ) -> Self {
        Self { store, mission, detector, navigator, output }
    }
}

#[async_trait]
impl PeriodicTask for NavigationTask {
    fn name(&self) -> &'static str { "navigation" }

    async fn tick(&mut self) {
        let state = self.store.read().await;
        let target = self.mission.target().await;
        let threat_location = self.mission.threat_location().await;
        let mut waypoint = self.mission.waypoint().await;
        if let Some(reached) = waypoint.filter(|w| w.reached(state.position())) {
            if self.mission.clear_waypoint(&reached).await {
                info!("Waypoint {} reached.", reached.position());
            }
            waypoint = None;
        }
        let inputs = NavInputs {
            state: &state,
            target: target.as_ref(),
            threat_location: threat_location.as_ref(),
            omega: self.mission.omega(),
            waypoint: waypoint.as_ref(),
            collision: self.detector.assess(&state),
            wall_t: Utc::now(),
            mono_t: Instant::now(),
        };
        let cmd = self.navigator.compute(&inputs);
        if cmd.collision_risk {
            warn!("Collision risk reported, steering to {:?}.", cmd.target);
        }
        event!("NAV {} -> {:?} at {:.1}m/s", cmd.action, cmd.target, cmd.speed);
        self.output.send_replace(cmd);
    }
}
