use super::{CommandError, DriftPolicy, Orchestrator, PeriodicScheduler, PeriodicTask};
use crate::config::{ConfigurationError, EscortConfig};
use crate::flight_control::{
    FlightMode, LandingOutcome, SteerAction,
    common::{
        Position,
        geo::{destination_point, haversine_distance},
    },
};
use crate::hal::{
    HalBackend, HardwareError,
    simulated::{SimConfig, SimulatedHal},
};
use crate::mode_control::{MissionMode, ProtectionTarget, ThreatLevel};
use async_trait::async_trait;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

struct Counter {
    ticks: Arc<AtomicU64>,
    work: Duration,
}

#[async_trait]
impl PeriodicTask for Counter {
    fn name(&self) -> &'static str { "counter" }

    async fn tick(&mut self) {
        if !self.work.is_zero() {
            sleep(self.work).await;
        }
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_ticks_at_period_until_cancelled() {
    let ticks = Arc::new(AtomicU64::new(0));
    let c_tok = CancellationToken::new();
    let task = Counter { ticks: Arc::clone(&ticks), work: Duration::ZERO };
    let handle = PeriodicScheduler::new(Duration::from_millis(100), DriftPolicy::Skip).spawn(task, c_tok.clone());

    sleep(Duration::from_millis(1050)).await;
    c_tok.cancel();
    let stats = handle.await.unwrap();
    assert_eq!(stats.name, "counter");
    assert_eq!(stats.ticks, 11);
    assert_eq!(ticks.load(Ordering::Relaxed), 11);
    assert_eq!(stats.deadline_misses, 0);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(ticks.load(Ordering::Relaxed), 11, "no tick after cancellation");
}

#[tokio::test(start_paused = true)]
async fn test_overrunning_ticks_are_counted_and_finished() {
    let ticks = Arc::new(AtomicU64::new(0));
    let c_tok = CancellationToken::new();
    let task = Counter { ticks: Arc::clone(&ticks), work: Duration::from_millis(150) };
    let t0 = Instant::now();
    let handle = PeriodicScheduler::new(Duration::from_millis(100), DriftPolicy::Skip).spawn(task, c_tok.clone());

    // ticks start at 0, 200, 400, 600 and 800ms, the last one is cut by the cancellation
    sleep(Duration::from_millis(900)).await;
    c_tok.cancel();
    let stats = handle.await.unwrap();
    assert_eq!(t0.elapsed(), Duration::from_millis(950));
    assert_eq!(stats.ticks, 5);
    assert_eq!(stats.deadline_misses, 5);
    assert_eq!(stats.worst_tick, Duration::from_millis(150));
}

fn quiet_sim() -> HalBackend {
    HalBackend::Simulated(SimulatedHal::new(SimConfig { battery_drain_per_read: 0.0, ..SimConfig::default() }))
}

#[tokio::test(start_paused = true)]
async fn test_takeoff_escort_and_shutdown_landing() {
    let orch = Orchestrator::start(EscortConfig::default(), quiet_sim()).await;
    let home = *orch.state().await.position();

    assert!(matches!(
        orch.arm_and_takeoff(1.0).await,
        Err(CommandError::Configuration(ConfigurationError::AltitudeOutOfRange))
    ));
    assert!(matches!(
        orch.arm_and_takeoff(500.0).await,
        Err(CommandError::Configuration(ConfigurationError::AltitudeOutOfRange))
    ));
    orch.arm_and_takeoff(10.0).await.unwrap();
    sleep(Duration::from_secs(8)).await;
    let state = orch.state().await;
    assert!(state.armed());
    assert!((state.position().alt() - 10.0).abs() < 0.5);

    let spot = destination_point(&home, 0.0, 40.0);
    let bad = ProtectionTarget::new("vip", spot, -1.0, false);
    assert!(matches!(
        orch.set_protection_target(bad).await,
        Err(CommandError::Configuration(ConfigurationError::NonPositiveRadius))
    ));
    orch.set_protection_target(ProtectionTarget::new("vip", spot, 20.0, false)).await.unwrap();
    sleep(Duration::from_secs(20)).await;
    let d = haversine_distance(orch.state().await.position(), &spot);
    assert!(d <= 15.0 + 5.0 + 0.5, "still {d:.1}m from the target");
    assert!(orch.nav_command().distance_to_target.is_some());
    assert!(!orch.verdict().critical_failure);

    let transition = orch.update_threat_level(ThreatLevel::Yellow).await.unwrap();
    assert_eq!(transition.from, ThreatLevel::Green);
    assert_eq!(transition.mode, MissionMode::EnhancedWatch);

    let report = orch.shutdown().await;
    assert!(matches!(report.landing, Some(Ok(LandingOutcome::Landed))));
    assert!(!report.armed);
    assert_eq!(report.flight_mode, FlightMode::Disarmed);
    let mut names: Vec<&str> = report.tasks.iter().map(|t| t.name).collect();
    names.sort_unstable();
    assert_eq!(names, ["control", "navigation", "safety", "telemetry"]);
    assert!(report.tasks.iter().all(|t| t.ticks > 0));

    assert!(!orch.is_accepting());
    assert!(matches!(orch.update_threat_level(ThreatLevel::Red).await, Err(CommandError::ShuttingDown)));
    assert!(matches!(orch.emergency_land().await, Err(CommandError::ShuttingDown)));
}

#[tokio::test(start_paused = true)]
async fn test_operator_landing_is_terminal() {
    let orch = Orchestrator::start(EscortConfig::default(), quiet_sim()).await;
    orch.arm_and_takeoff(5.0).await.unwrap();
    sleep(Duration::from_secs(4)).await;

    let mut alerts = orch.subscribe_alerts();
    assert_eq!(orch.emergency_land().await.unwrap(), LandingOutcome::Landed);
    assert_eq!(orch.emergency_land().await.unwrap(), LandingOutcome::AlreadyDisarmed);
    let state = orch.state().await;
    assert!(!state.armed());
    assert_eq!(state.flight_mode(), FlightMode::Disarmed);
    assert!(alerts.try_recv().is_ok());

    assert!(matches!(orch.arm_and_takeoff(10.0).await, Err(CommandError::Terminal)));
    let sim_disarms = orch.keychain().hal().as_simulated().unwrap().disarm_calls().await;
    assert_eq!(sim_disarms, 1);

    let report = orch.shutdown().await;
    assert!(report.landing.is_none());
    assert_eq!(report.flight_mode, FlightMode::Disarmed);
}

#[tokio::test(start_paused = true)]
async fn test_threat_reports_and_telemetry() {
    let orch = Orchestrator::start(EscortConfig::default(), quiet_sim()).await;
    let mut telemetry = orch.subscribe_telemetry();

    let nowhere = Position::new(120.0, 0.0, 0.0);
    assert!(matches!(
        orch.report_threat(ThreatLevel::Red, nowhere).await,
        Err(CommandError::Configuration(ConfigurationError::InvalidCoordinates))
    ));
    let here = *orch.state().await.position();
    let threat = destination_point(&here, 90.0, 60.0);
    let transition = orch.report_threat(ThreatLevel::Orange, threat).await.unwrap();
    assert_eq!(transition.mode, MissionMode::Defensive);

    orch.override_mission_mode(MissionMode::ActiveProtection).await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    let mut record = telemetry.recv().await.unwrap();
    while let Ok(newer) = telemetry.try_recv() {
        record = newer;
    }
    assert_eq!(record.threat_level, ThreatLevel::Orange);
    assert_eq!(record.mission_mode, MissionMode::ActiveProtection);
    assert_eq!(record.flight_mode, FlightMode::Protection);
    assert_eq!(record.target_id, None);

    let report = orch.shutdown().await;
    assert!(report.landing.is_none());
    assert!(!report.armed);
}

#[tokio::test(start_paused = true)]
async fn test_landing_during_arm_call_wins() {
    let orch = Orchestrator::start(EscortConfig::default(), quiet_sim()).await;
    let hal = orch.keychain().hal();
    let sim = hal.as_simulated().unwrap();
    sim.stall_next_arm(Duration::from_millis(10)).await;

    let (takeoff, landing) = tokio::join!(orch.arm_and_takeoff(10.0), async {
        sleep(Duration::from_millis(1)).await;
        orch.emergency_land().await
    });
    assert!(matches!(takeoff, Err(CommandError::Terminal)));
    assert_eq!(landing.unwrap(), LandingOutcome::Landed);

    let state = orch.state().await;
    assert!(!state.armed());
    assert_eq!(state.flight_mode(), FlightMode::Disarmed);
    assert_eq!(sim.arm_calls().await, 1);
    assert_eq!(sim.disarm_calls().await, 1);
    assert!(!sim.is_armed().await);
    assert_eq!(sim.commands_sent().await, 0);

    let report = orch.shutdown().await;
    assert!(!report.armed);
    assert_eq!(report.flight_mode, FlightMode::Disarmed);
}

#[tokio::test(start_paused = true)]
async fn test_arm_timeout_is_reported() {
    let orch = Orchestrator::start(EscortConfig::default(), quiet_sim()).await;
    let hal = orch.keychain().hal();
    hal.as_simulated().unwrap().stall_next_arm(Duration::from_secs(1)).await;

    let res = orch.arm_and_takeoff(10.0).await;
    assert!(matches!(res, Err(CommandError::Hardware(HardwareError::Timeout))));
    assert!(!orch.state().await.armed());
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_gps_loss_above_ceiling_descends() {
    let orch = Orchestrator::start(EscortConfig::default(), quiet_sim()).await;
    let home = *orch.state().await.position();
    orch.arm_and_takeoff(10.0).await.unwrap();
    sleep(Duration::from_secs(5)).await;

    let hal = orch.keychain().hal();
    let sim = hal.as_simulated().unwrap();
    sim.set_position(home.at_alt(130.0)).await;
    sim.set_gps(true, 3).await;
    sleep(Duration::from_secs(15)).await;

    let state = orch.state().await;
    assert_eq!(state.flight_mode(), FlightMode::AltitudeHold);
    let alt = state.position().alt();
    assert!((109.0..120.0).contains(&alt), "holding at {alt:.1}m");
    assert_eq!(orch.nav_command().action, SteerAction::AltitudeHold);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_navigate_to_flies_and_clears_waypoint() {
    let orch = Orchestrator::start(EscortConfig::default(), quiet_sim()).await;
    let home = *orch.state().await.position();
    let goal = destination_point(&home, 45.0, 30.0).at_alt(12.0);

    assert!(matches!(orch.navigate_to(goal, None).await, Err(CommandError::Hardware(HardwareError::NotArmed))));
    assert!(matches!(
        orch.navigate_to(goal.at_alt(150.0), None).await,
        Err(CommandError::Configuration(ConfigurationError::AltitudeOutOfRange))
    ));
    assert!(matches!(
        orch.navigate_to(Position::new(0.0, 200.0, 12.0), None).await,
        Err(CommandError::Configuration(ConfigurationError::InvalidCoordinates))
    ));
    assert!(matches!(
        orch.navigate_to(goal, Some(-2.0)).await,
        Err(CommandError::Configuration(ConfigurationError::InvalidThreshold(_)))
    ));

    orch.arm_and_takeoff(12.0).await.unwrap();
    sleep(Duration::from_secs(8)).await;
    orch.navigate_to(goal, Some(50.0)).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    let cmd = orch.nav_command();
    assert_eq!(cmd.action, SteerAction::Waypoint);
    assert!((cmd.speed - 10.0).abs() < 1e-9, "capped at the green maximum");

    sleep(Duration::from_secs(10)).await;
    assert!(haversine_distance(orch.state().await.position(), &goal) <= 1.0);
    assert_eq!(orch.keychain().mission().waypoint().await, None);
    assert_ne!(orch.nav_command().action, SteerAction::Waypoint);

    assert_eq!(orch.emergency_land().await.unwrap(), LandingOutcome::Landed);
    assert!(matches!(orch.navigate_to(goal, None).await, Err(CommandError::Terminal)));
    orch.shutdown().await;
}
