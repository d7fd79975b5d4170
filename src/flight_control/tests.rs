use super::{
    ChannelSink, CollisionAssessment, CollisionDetector, ControlTask, EmergencyError, FlightMode, FlightState,
    FlightStateStore, LandingOutcome, NavCommand, NavInputs, NavigationTask, Navigator, NoCollisionSensor, SafetyAction,
    SafetyMonitor, SafetyVerdict, SteerAction, TelemetrySink, TelemetryTask,
    common::{
        Position,
        geo::{bearing, destination_point, haversine_distance},
    },
};
use crate::config::{EscortConfig, SafetyThresholds};
use crate::hal::{FlightHal, HalBackend, SensorSnapshot, simulated::{SimConfig, SimulatedHal}};
use crate::keychain::Keychain;
use crate::mode_control::{MissionMode, OmegaLatch, OperatorAlert, ProtectionTarget, ThreatLevel, Waypoint};
use crate::scheduling::PeriodicTask;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch},
    time::Instant,
};

const ORBIT_PERIOD: Duration = Duration::from_secs(60);

fn navigator() -> Navigator { Navigator::new(ORBIT_PERIOD, &SafetyThresholds::default()) }

fn home() -> Position { Position::new(40.7128, -74.0060, 0.0) }

fn snapshot(position: Position) -> SensorSnapshot {
    SensorSnapshot {
        position,
        velocity: super::common::Velocity::default(),
        battery_voltage: 25.2,
        battery_pct: 100.0,
        gps_lock: true,
        satellites: 12,
    }
}

fn airborne_state(position: Position, level: ThreatLevel) -> FlightState {
    let mut state = FlightState::new(position);
    state.apply_sensors(&snapshot(position), Instant::now());
    state.apply_threat(level);
    state.set_armed(true);
    state
}

fn inputs<'a>(
    state: &'a FlightState,
    target: Option<&'a ProtectionTarget>,
    omega: &'a OmegaLatch,
) -> NavInputs<'a> {
    NavInputs {
        state,
        target,
        threat_location: None,
        omega,
        waypoint: None,
        collision: CollisionAssessment::CLEAR,
        wall_t: Utc::now(),
        mono_t: Instant::now(),
    }
}

/// Aircraft at `distance` meters east of a green level target, at the green patrol altitude.
fn steer_at(distance: f64) -> NavCommand {
    let target = ProtectionTarget::new("vip", home(), 10.0, false);
    let position = destination_point(&home(), 90.0, distance).at_alt(10.0);
    let state = airborne_state(position, ThreatLevel::Green);
    let latch = OmegaLatch::default();
    navigator().compute(&inputs(&state, Some(&target), &latch))
}

#[test]
fn test_hysteresis_closing() {
    let cmd = steer_at(15.0 + 6.0);
    assert_eq!(cmd.action, SteerAction::Closing);
    assert!((cmd.speed - 7.0).abs() < 1e-9);
    assert!(cmd.target.is_some());
    assert!(!cmd.altitude_correction);
}

#[test]
fn test_hysteresis_backing_off() {
    let cmd = steer_at(15.0 - 6.0);
    assert_eq!(cmd.action, SteerAction::BackingOff);
    assert!((cmd.speed - 5.0).abs() < 1e-9);
    assert!(cmd.target.is_some());
}

#[test]
fn test_hysteresis_hold_on_radius() {
    let cmd = steer_at(15.0);
    assert_eq!(cmd.action, SteerAction::Hold);
    assert_eq!(cmd.target, None);
    let d = cmd.distance_to_target.unwrap();
    assert!((d - 15.0).abs() < 1e-3);
}

#[test]
fn test_altitude_correction_without_horizontal_move() {
    let target = ProtectionTarget::new("vip", home(), 10.0, false);
    let position = destination_point(&home(), 180.0, 12.0).at_alt(10.0);
    // red wants 25m, the aircraft is at 10m and outside the band of the 5m orbit
    let state = airborne_state(position, ThreatLevel::Red);
    let latch = OmegaLatch::default();
    let cmd = navigator().compute(&inputs(&state, Some(&target), &latch));
    assert_eq!(cmd.action, SteerAction::Closing);
    assert!(cmd.altitude_correction);
    assert!((cmd.target.unwrap().alt() - 25.0).abs() < 1e-9);

    let on_orbit = destination_point(&home(), 180.0, 5.0).at_alt(10.0);
    let state = airborne_state(on_orbit, ThreatLevel::Red);
    let cmd = navigator().compute(&inputs(&state, Some(&target), &latch));
    assert_eq!(cmd.action, SteerAction::AltitudeCorrection);
    assert!((cmd.speed - 6.0).abs() < 1e-9);
    let commanded = cmd.target.unwrap();
    assert!((commanded.alt() - 25.0).abs() < 1e-9);
    assert!(haversine_distance(&commanded, &on_orbit) < 1e-6);
}

#[test]
fn test_no_target_is_patrol_noop() {
    let state = airborne_state(home().at_alt(3.0), ThreatLevel::Yellow);
    let latch = OmegaLatch::default();
    let cleared = ProtectionTarget::cleared(home());
    let mut nav = navigator();
    assert_eq!(nav.compute(&inputs(&state, None, &latch)), NavCommand::idle());
    assert_eq!(nav.compute(&inputs(&state, Some(&cleared), &latch)), NavCommand::idle());
}

#[test]
fn test_disarmed_or_terminal_yields_no_command() {
    let target = ProtectionTarget::new("vip", home(), 10.0, false);
    let far = destination_point(&home(), 0.0, 200.0).at_alt(10.0);
    let latch = OmegaLatch::default();
    let mut nav = navigator();

    let mut state = airborne_state(far, ThreatLevel::Green);
    state.set_armed(false);
    assert_eq!(nav.compute(&inputs(&state, Some(&target), &latch)).target, None);

    let mut state = airborne_state(far, ThreatLevel::Green);
    state.enter_emergency_land();
    assert_eq!(nav.compute(&inputs(&state, Some(&target), &latch)).target, None);
}

#[test]
fn test_altitude_hold_suspends_orbit() {
    let target = ProtectionTarget::new("vip", home(), 10.0, false);
    let far = destination_point(&home(), 0.0, 200.0).at_alt(10.0);
    let mut state = airborne_state(far, ThreatLevel::Green);
    assert!(state.force_altitude_hold());
    let latch = OmegaLatch::default();
    let cmd = navigator().compute(&inputs(&state, Some(&target), &latch));
    assert_eq!(cmd.action, SteerAction::AltitudeHold);
    assert!(haversine_distance(&cmd.target.unwrap(), &far) < 1e-6);
}

#[test]
fn test_collision_avoidance_preempts_protection() {
    let target = ProtectionTarget::new("vip", home(), 10.0, false);
    let far = destination_point(&home(), 0.0, 200.0).at_alt(10.0);
    let state = airborne_state(far, ThreatLevel::Orange);
    assert_eq!(NoCollisionSensor.assess(&state), CollisionAssessment::CLEAR);

    let escape = destination_point(&far, 180.0, 20.0);
    let latch = OmegaLatch::default();
    let mut nav_in = inputs(&state, Some(&target), &latch);
    nav_in.collision = CollisionAssessment::avoid(escape);
    let cmd = navigator().compute(&nav_in);
    assert_eq!(cmd.action, SteerAction::Avoidance);
    assert!(cmd.collision_risk);
    assert_eq!(cmd.target, Some(escape));
    assert!((cmd.speed - 15.0).abs() < 1e-9);
}

#[test]
fn test_intercept_point_faces_threat() {
    let target = ProtectionTarget::new("vip", home(), 10.0, false);
    let threat = destination_point(&home(), 90.0, 100.0);
    let position = destination_point(&home(), 270.0, 50.0).at_alt(20.0);
    let state = airborne_state(position, ThreatLevel::Orange);
    let latch = OmegaLatch::default();
    let mut nav_in = inputs(&state, Some(&target), &latch);
    nav_in.threat_location = Some(&threat);
    let cmd = navigator().compute(&nav_in);

    assert_eq!(cmd.action, SteerAction::Closing);
    assert!((cmd.speed - 10.5).abs() < 1e-9);
    let intercept = cmd.target.unwrap();
    assert!((haversine_distance(&home(), &intercept) - 8.0).abs() < 1e-3);
    assert!((bearing(&home(), &intercept) - 90.0).abs() < 0.01);
    assert!((intercept.alt() - 20.0).abs() < 1e-9);
}

#[test]
fn test_omega_maneuver_runs_once() {
    let start = home().at_alt(30.0);
    let state = airborne_state(start, ThreatLevel::Omega);
    let latch = OmegaLatch::default();
    assert!(latch.request());
    let mut nav = navigator();
    let t0 = Instant::now();

    let mut nav_in = inputs(&state, None, &latch);
    nav_in.mono_t = t0;
    let climb = nav.compute(&nav_in);
    assert_eq!(climb.action, SteerAction::Omega);
    assert!((climb.speed - 25.0).abs() < 1e-9);
    assert!((climb.target.unwrap().alt() - 40.0).abs() < 1e-9);
    assert!(!latch.request(), "a running maneuver must not be stacked");

    // climb takes 10m / 25m/s + dwell = 0.9s
    nav_in.mono_t = t0 + Duration::from_millis(1000);
    let first = nav.compute(&nav_in).target.unwrap();
    assert!((haversine_distance(&start, &first) - 11.0).abs() < 1e-3);
    assert!(bearing(&start, &first) < 0.01 || bearing(&start, &first) > 359.99);

    nav_in.mono_t = t0 + Duration::from_millis(2000);
    let third = nav.compute(&nav_in).target.unwrap();
    assert!((bearing(&start, &third) - 180.0).abs() < 0.01);

    nav_in.mono_t = t0 + Duration::from_millis(3000);
    assert_eq!(nav.compute(&nav_in), NavCommand::idle());
    assert!(!nav.omega_active());
    assert!(latch.is_idle());
    assert!(latch.request());
}

#[test]
fn test_altitude_hold_above_ceiling_descends_to_floor() {
    let latch = OmegaLatch::default();
    let mut nav = navigator();
    let hold_at = |alt: f64| {
        let mut state = airborne_state(home().at_alt(alt), ThreatLevel::Green);
        assert!(state.force_altitude_hold());
        state
    };

    let state = hold_at(130.0);
    let cmd = nav.compute(&inputs(&state, None, &latch));
    assert_eq!(cmd.action, SteerAction::AltitudeHold);
    assert!((cmd.target.unwrap().alt() - 110.0).abs() < 1e-9);
    assert!((cmd.speed - 5.0).abs() < 1e-9);
    assert!(haversine_distance(&cmd.target.unwrap(), &home()) < 1e-6);

    // below the ceiling but not yet at the floor, the descent continues
    let state = hold_at(115.0);
    let cmd = nav.compute(&inputs(&state, None, &latch));
    assert!((cmd.target.unwrap().alt() - 110.0).abs() < 1e-9);

    let state = hold_at(111.0);
    let cmd = nav.compute(&inputs(&state, None, &latch));
    assert!((cmd.target.unwrap().alt() - 111.0).abs() < 1e-9);
    assert!((cmd.speed - 3.0).abs() < 1e-9);

    let state = hold_at(115.0);
    let cmd = nav.compute(&inputs(&state, None, &latch));
    assert!((cmd.target.unwrap().alt() - 115.0).abs() < 1e-9, "no descent without a violation");
}

#[test]
fn test_commanded_altitude_capped_at_ceiling() {
    let state = airborne_state(home().at_alt(115.0), ThreatLevel::Omega);
    let latch = OmegaLatch::default();
    assert!(latch.request());
    let climb = navigator().compute(&inputs(&state, None, &latch));
    assert_eq!(climb.action, SteerAction::Omega);
    assert!((climb.target.unwrap().alt() - 120.0).abs() < 1e-9);
}

#[test]
fn test_waypoint_preempts_orbit_with_speed_cap() {
    let target = ProtectionTarget::new("vip", home(), 10.0, false);
    let far = destination_point(&home(), 0.0, 200.0).at_alt(10.0);
    let goal = destination_point(&home(), 90.0, 80.0).at_alt(20.0);
    let latch = OmegaLatch::default();
    let mut nav = navigator();

    let state = airborne_state(far, ThreatLevel::Green);
    for (requested, expected) in [(None, 10.0), (Some(30.0), 10.0), (Some(4.0), 4.0)] {
        let waypoint = Waypoint::new(goal, requested);
        let mut nav_in = inputs(&state, Some(&target), &latch);
        nav_in.waypoint = Some(&waypoint);
        let cmd = nav.compute(&nav_in);
        assert_eq!(cmd.action, SteerAction::Waypoint);
        assert_eq!(cmd.target, Some(goal));
        assert!((cmd.speed - expected).abs() < 1e-9, "{requested:?}");
        assert_eq!(cmd.distance_to_target, None);
    }

    let waypoint = Waypoint::new(goal, None);
    let mut held = airborne_state(far, ThreatLevel::Green);
    assert!(held.force_altitude_hold());
    let mut nav_in = inputs(&held, Some(&target), &latch);
    nav_in.waypoint = Some(&waypoint);
    assert_eq!(nav.compute(&nav_in).action, SteerAction::AltitudeHold);

    let escape = destination_point(&far, 180.0, 20.0);
    let mut nav_in = inputs(&state, Some(&target), &latch);
    nav_in.waypoint = Some(&waypoint);
    nav_in.collision = CollisionAssessment::avoid(escape);
    assert_eq!(nav.compute(&nav_in).action, SteerAction::Avoidance);
}

#[test]
fn test_waypoint_validation() {
    let goal = home().at_alt(20.0);
    assert!(Waypoint::new(goal, Some(3.0)).validate(2.0, 120.0).is_ok());
    assert!(Waypoint::new(goal, None).validate(2.0, 120.0).is_ok());
    assert!(Waypoint::new(goal, Some(0.0)).validate(2.0, 120.0).is_err());
    assert!(Waypoint::new(goal.at_alt(121.0), None).validate(2.0, 120.0).is_err());
    assert!(Waypoint::new(Position::new(91.0, 0.0, 20.0), None).validate(2.0, 120.0).is_err());
    assert!(Waypoint::new(goal, None).reached(&goal.at_alt(20.5)));
    assert!(!Waypoint::new(goal, None).reached(&destination_point(&goal, 0.0, 3.0)));
}

fn sim_config(battery_pct: f64, drain: f64) -> SimConfig {
    SimConfig { start: home(), battery_pct, battery_drain_per_read: drain, satellites: 12, gps_noise_m: 0.0 }
}

/// Wires the shared components the way the orchestrator does, around a simulated aircraft.
struct Rig {
    config: EscortConfig,
    keychain: Keychain,
}

impl Rig {
    fn new(sim: SimConfig) -> Self {
        let config = EscortConfig::default();
        let keychain = Keychain::new(&config, HalBackend::Simulated(SimulatedHal::new(sim)), sim.start);
        Self { config, keychain }
    }

    fn hal(&self) -> Arc<HalBackend> { self.keychain.hal() }

    fn store(&self) -> Arc<FlightStateStore> { self.keychain.store() }

    async fn refresh(&self) {
        let snap = self.hal().read_sensors().await.unwrap();
        self.store().update(|s| s.apply_sensors(&snap, Instant::now())).await;
    }

    async fn arm_at(&self, alt: f64) {
        let hal = self.hal();
        let sim = hal.as_simulated().unwrap();
        sim.set_position(home().at_alt(alt)).await;
        sim.arm().await.unwrap();
        self.refresh().await;
        self.store().update(|s| s.set_armed(true)).await;
    }

    fn safety(&self) -> (SafetyMonitor, watch::Receiver<SafetyVerdict>) {
        let (tx, rx) = watch::channel(SafetyVerdict::NOMINAL);
        let monitor = SafetyMonitor::new(
            self.store(),
            self.hal(),
            self.keychain.landing(),
            self.config.thresholds,
            self.config.hw_timeout,
            self.keychain.alert_tx(),
            tx,
        );
        (monitor, rx)
    }

    fn control(&self, nav: watch::Receiver<NavCommand>) -> ControlTask {
        ControlTask::new(
            self.store(),
            self.hal(),
            nav,
            self.config.hw_timeout,
            self.config.thresholds.max_consecutive_hw_failures,
        )
    }
}

#[tokio::test(start_paused = true)]
async fn test_critical_overrides_degraded() {
    let rig = Rig::new(sim_config(10.0, 0.0));
    rig.hal().as_simulated().unwrap().set_gps(false, 2).await;
    rig.arm_at(12.0).await;
    let (mut safety, verdict_rx) = rig.safety();

    let (verdict, action) = safety.evaluate_and_act().await;
    assert!(verdict.critical_failure);
    assert!(verdict.degraded_performance);
    assert_eq!(action, SafetyAction::EmergencyLanding);
    assert_eq!(rig.store().read().await.flight_mode(), FlightMode::EmergencyLand);
    assert_eq!(*verdict_rx.borrow(), verdict);

    let outcome = safety.join_landing().await.unwrap().unwrap();
    assert_eq!(outcome, LandingOutcome::Landed);
    let state = rig.store().read().await;
    assert_eq!(state.flight_mode(), FlightMode::Disarmed);
    assert!(!state.armed());
}

#[tokio::test(start_paused = true)]
async fn test_gps_loss_forces_and_releases_altitude_hold() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    let hal = rig.hal();
    let sim = hal.as_simulated().unwrap();
    sim.set_gps(true, 4).await;
    rig.arm_at(10.0).await;
    let (mut safety, _) = rig.safety();

    let (verdict, action) = safety.evaluate_and_act().await;
    assert!(!verdict.gps_healthy && !verdict.critical_failure);
    assert_eq!(action, SafetyAction::AltitudeHoldForced);
    assert_eq!(rig.store().read().await.flight_mode(), FlightMode::AltitudeHold);
    assert_eq!(safety.evaluate_and_act().await.1, SafetyAction::None);

    sim.set_gps(true, 9).await;
    rig.refresh().await;
    let (verdict, action) = safety.evaluate_and_act().await;
    assert!(verdict.gps_healthy && !verdict.degraded_performance);
    assert_eq!(action, SafetyAction::AltitudeHoldReleased);
    assert_eq!(rig.store().read().await.flight_mode(), FlightMode::Protection);
}

#[tokio::test(start_paused = true)]
async fn test_communication_timeout_is_critical() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(6.0).await;
    let mut alerts = rig.keychain.alerts();
    let (mut safety, _) = rig.safety();
    assert!(!safety.evaluate_and_act().await.0.critical_failure);

    tokio::time::advance(Duration::from_secs(4)).await;
    let (verdict, action) = safety.evaluate_and_act().await;
    assert!(!verdict.communication_healthy);
    assert!(verdict.critical_failure);
    assert_eq!(action, SafetyAction::EmergencyLanding);
    assert_eq!(alerts.recv().await.unwrap(), OperatorAlert::CommunicationLost);
    assert!(matches!(alerts.recv().await.unwrap(), OperatorAlert::EmergencyLandingEngaged(_)));
    assert_eq!(safety.join_landing().await.unwrap().unwrap(), LandingOutcome::Landed);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_landing_is_idempotent() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(5.0).await;
    let landing = rig.keychain.landing();

    assert_eq!(landing.engage("test").await.unwrap(), LandingOutcome::Landed);
    let after_first = rig.store().read().await;
    assert_eq!(after_first.flight_mode(), FlightMode::Disarmed);
    assert!(!after_first.armed());
    assert!(after_first.position().alt() <= rig.config.ground_tolerance);

    assert_eq!(landing.engage("again").await.unwrap(), LandingOutcome::AlreadyDisarmed);
    let after_second = rig.store().read().await;
    assert_eq!(after_second.flight_mode(), FlightMode::Disarmed);
    assert!(!after_second.armed());

    let hal = rig.hal();
    let sim = hal.as_simulated().unwrap();
    assert_eq!(sim.disarm_calls().await, 1);
    assert_eq!(sim.arm_calls().await, 1);
    assert!(!sim.is_armed().await);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_landings_disarm_once() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(3.0).await;
    let landing = rig.keychain.landing();
    let (a, b) = tokio::join!(landing.engage("a"), landing.engage("b"));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| *o == LandingOutcome::AlreadyDisarmed);
    assert_eq!(outcomes, vec![LandingOutcome::Landed, LandingOutcome::AlreadyDisarmed]);
    assert_eq!(rig.hal().as_simulated().unwrap().disarm_calls().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_landing_failure_is_surfaced_and_resumable() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(4.0).await;
    let mut alerts = rig.keychain.alerts();
    let hal = rig.hal();
    let sim = hal.as_simulated().unwrap();
    sim.fail_next_reads(u32::MAX).await;

    let landing = rig.keychain.landing();
    let res = landing.engage("link test").await;
    assert!(matches!(res, Err(EmergencyError::Unrecoverable(_))));
    assert!(matches!(alerts.recv().await.unwrap(), OperatorAlert::EmergencyLandingEngaged(_)));
    assert!(matches!(alerts.recv().await.unwrap(), OperatorAlert::LandingFailed(_)));
    let state = rig.store().read().await;
    assert_eq!(state.flight_mode(), FlightMode::EmergencyLand);
    assert!(state.armed());

    sim.fail_next_reads(0).await;
    assert_eq!(landing.engage("retry").await.unwrap(), LandingOutcome::Landed);
    assert!(!rig.store().read().await.armed());
}

#[tokio::test(start_paused = true)]
async fn test_battery_drain_end_to_end() {
    let rig = Rig::new(sim_config(30.0, 1.0));
    rig.arm_at(10.0).await;
    // arming read consumed one percent
    rig.hal().as_simulated().unwrap().set_battery(30.0).await;
    let (_nav_tx, nav_rx) = watch::channel(NavCommand::idle());
    let mut control = rig.control(nav_rx);
    let (mut safety, _) = rig.safety();

    for tick in 1..=15 {
        control.tick().await;
        let (verdict, action) = safety.evaluate_and_act().await;
        let state = rig.store().read().await;
        assert!((state.battery_pct() - (30.0 - f64::from(tick))).abs() < 1e-9);
        assert_eq!(action, SafetyAction::None, "tick {tick}");
        assert_eq!(state.flight_mode(), FlightMode::Protection);
        assert_eq!(state.mission_mode(), MissionMode::Patrol);
        assert_eq!(verdict.battery_warning, tick >= 6, "tick {tick}");
        assert!(!verdict.critical_failure);
    }

    control.tick().await;
    let (verdict, action) = safety.evaluate_and_act().await;
    assert!((rig.store().read().await.battery_pct() - 14.0).abs() < 1e-9);
    assert!(verdict.critical_failure && !verdict.battery_healthy);
    assert_eq!(action, SafetyAction::EmergencyLanding);
    assert_eq!(rig.store().read().await.flight_mode(), FlightMode::EmergencyLand);

    assert_eq!(safety.join_landing().await.unwrap().unwrap(), LandingOutcome::Landed);
    let state = rig.store().read().await;
    assert!(!state.armed());
    assert_eq!(state.flight_mode(), FlightMode::Disarmed);
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_descent_is_one_shot() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(125.0).await;
    let (mut safety, _) = rig.safety();

    let (verdict, action) = safety.evaluate_and_act().await;
    assert!(!verdict.altitude_ok);
    assert!(!verdict.critical_failure && !verdict.degraded_performance);
    assert_eq!(action, SafetyAction::CeilingDescent);
    let (target, speed) = rig.hal().as_simulated().unwrap().last_command().await.unwrap();
    assert!((target.alt() - 110.0).abs() < 1e-9);
    assert!((speed - 5.0).abs() < 1e-9);

    assert_eq!(safety.evaluate_and_act().await.1, SafetyAction::None);
    assert_eq!(rig.store().read().await.flight_mode(), FlightMode::Protection);
}

#[tokio::test(start_paused = true)]
async fn test_control_forwards_navigation_target() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(10.0).await;
    let goal = destination_point(&home(), 45.0, 30.0).at_alt(10.0);
    let cmd = NavCommand { target: Some(goal), speed: 7.0, action: SteerAction::Closing, ..NavCommand::idle() };
    let (_nav_tx, nav_rx) = watch::channel(cmd);
    let mut control = rig.control(nav_rx);

    control.tick().await;
    let hal = rig.hal();
    let sim = hal.as_simulated().unwrap();
    assert_eq!(sim.last_command().await, Some((goal, 7.0)));
    assert_eq!(sim.commands_sent().await, 1);

    rig.store().update(|s| s.enter_emergency_land()).await;
    control.tick().await;
    assert_eq!(sim.commands_sent().await, 1, "navigation output is ignored while landing");
}

#[tokio::test(start_paused = true)]
async fn test_control_counts_link_failures() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(10.0).await;
    let (_nav_tx, nav_rx) = watch::channel(NavCommand::idle());
    let mut control = rig.control(nav_rx);
    let hal = rig.hal();
    hal.as_simulated().unwrap().fail_next_reads(5).await;

    for _ in 0..5 {
        control.tick().await;
    }
    let state = rig.store().read().await;
    assert_eq!(state.consecutive_hw_failures(), 5);
    let verdict = SafetyVerdict::evaluate(&state, &rig.config.thresholds, Instant::now());
    assert!(!verdict.communication_healthy && verdict.critical_failure);

    control.tick().await;
    assert_eq!(rig.store().read().await.consecutive_hw_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_commands_count_against_link() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(10.0).await;
    let goal = destination_point(&home(), 270.0, 25.0).at_alt(10.0);
    let cmd = NavCommand { target: Some(goal), speed: 5.0, action: SteerAction::Closing, ..NavCommand::idle() };
    let (_nav_tx, nav_rx) = watch::channel(cmd);
    let mut control = rig.control(nav_rx);
    let hal = rig.hal();
    let sim = hal.as_simulated().unwrap();
    sim.fail_next_commands(2).await;

    control.tick().await;
    control.tick().await;
    // the sensor read of each tick succeeded, only the dispatch failed
    assert_eq!(rig.store().read().await.consecutive_hw_failures(), 1);
    assert_eq!(sim.commands_sent().await, 0);

    control.tick().await;
    assert_eq!(rig.store().read().await.consecutive_hw_failures(), 0);
    assert_eq!(sim.last_command().await, Some((goal, 5.0)));
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_publishes_snapshot() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(10.0).await;
    let mission = rig.keychain.mission();
    mission.set_target(ProtectionTarget::new("vip", home(), 10.0, false)).await.unwrap();
    mission.update_threat(ThreatLevel::Red).await;

    let sink = ChannelSink::new(broadcast::channel(4).0);
    let mut records = sink.subscribe();
    let (_verdict_tx, verdict_rx) = watch::channel(SafetyVerdict::NOMINAL);
    let (_nav_tx, nav_rx) = watch::channel(NavCommand::idle());
    let sinks: Vec<Box<dyn TelemetrySink>> = vec![Box::new(sink)];
    let mut telemetry = TelemetryTask::new(rig.store(), mission, verdict_rx, nav_rx, sinks);

    telemetry.tick().await;
    let record = records.recv().await.unwrap();
    assert_eq!(record.threat_level, ThreatLevel::Red);
    assert_eq!(record.mission_mode, MissionMode::ActiveProtection);
    assert_eq!(record.flight_mode, FlightMode::Protection);
    assert_eq!(record.target_id.as_deref(), Some("vip"));
    assert_eq!(record.verdict, SafetyVerdict::NOMINAL);
    assert!(record.state.armed());
}

#[tokio::test(start_paused = true)]
async fn test_navigation_task_drops_reached_waypoint() {
    let rig = Rig::new(sim_config(80.0, 0.0));
    rig.arm_at(10.0).await;
    let mission = rig.keychain.mission();
    let goal = destination_point(&home(), 45.0, 40.0).at_alt(15.0);
    mission.set_waypoint(Waypoint::new(goal, Some(6.0))).await;
    let (nav_tx, nav_rx) = watch::channel(NavCommand::idle());
    let mut navigation =
        NavigationTask::new(rig.store(), Arc::clone(&mission), Box::new(NoCollisionSensor), navigator(), nav_tx);

    navigation.tick().await;
    let cmd = *nav_rx.borrow();
    assert_eq!(cmd.action, SteerAction::Waypoint);
    assert_eq!(cmd.target, Some(goal));
    assert!((cmd.speed - 6.0).abs() < 1e-9);

    rig.hal().as_simulated().unwrap().set_position(goal).await;
    rig.refresh().await;
    navigation.tick().await;
    assert_eq!(mission.waypoint().await, None);
    assert_eq!(*nav_rx.borrow(), NavCommand::idle());
}
