use super::{
    mission_mode::{ControlParameters, MissionMode, ThreatLevel},
    protection_target::ProtectionTarget,
    signal::ThreatTransition,
    waypoint::Waypoint,
};
use crate::config::ConfigurationError;
use crate::flight_control::{common::Position, flight_state::FlightStateStore};
use crate::{info, log, warn};
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tokio::sync::{Mutex, RwLock};

/// One-shot request slot for the omega maneuver.
///
/// Cycles `IDLE -> REQUESTED -> IN_FLIGHT -> IDLE`. A request is only
/// accepted in `IDLE`, so repeated omega updates never stack maneuvers.
#[derive(Debug, Default)]
pub struct OmegaLatch(AtomicU8);

impl OmegaLatch {
    const IDLE: u8 = 0;
    const REQUESTED: u8 = 1;
    const IN_FLIGHT: u8 = 2;

    /// Queues a maneuver. Returns `false` if one is already queued or running.
    pub fn request(&self) -> bool {
        self.0
            .compare_exchange(Self::IDLE, Self::REQUESTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims a queued request for execution.
    pub fn take(&self) -> bool {
        self.0
            .compare_exchange(Self::REQUESTED, Self::IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the running maneuver as finished.
    pub fn complete(&self) { self.0.store(Self::IDLE, Ordering::Release); }

    pub fn is_idle(&self) -> bool { self.0.load(Ordering::Acquire) == Self::IDLE }
}

/// Maps threat changes onto the mission mode and owns the protection target.
pub struct MissionStateMachine {
    store: Arc<FlightStateStore>,
    target: RwLock<ProtectionTarget>,
    threat_location: RwLock<Option<Position>>,
    omega: OmegaLatch,
    waypoint: RwLock<Option<Waypoint>>,
    /// Serializes threat and target updates against each other.
    intake: Mutex<()>,
}

impl MissionStateMachine {
    pub fn new(store: Arc<FlightStateStore>, home: Position) -> Self {
        Self {
            store,
            target: RwLock::new(ProtectionTarget::cleared(home)),
            threat_location: RwLock::new(None),
            omega: OmegaLatch::default(),
            waypoint: RwLock::new(None),
            intake: Mutex::new(()),
        }
    }

    /// Applies a new threat level. Any level may follow any other; only
    /// `Omega` additionally queues the evasive maneuver.
    pub async fn update_threat(&self, level: ThreatLevel) -> ThreatTransition {
        self.report_threat(level, None).await
    }

    /// Like [`Self::update_threat`], additionally recording where the threat was observed.
    pub async fn report_threat(&self, level: ThreatLevel, location: Option<Position>) -> ThreatTransition {
        let _intake = self.intake.lock().await;
        *self.threat_location.write().await = location;
        let (from, terminal) = self
            .store
            .update(|state| {
                let prev = state.threat_level();
                state.apply_threat(level);
                (prev, state.flight_mode().is_terminal())
            })
            .await;
        let omega_requested = level == ThreatLevel::Omega && !terminal && self.omega.request();
        let params = ControlParameters::for_threat(level);
        let mode = MissionMode::from(level);
        if from == level {
            log!("Threat level {level} reconfirmed.");
        } else {
            info!(
                "Threat level {from} -> {level}: {mode}, orbit {}m, max speed {}m/s",
                params.orbit_radius(),
                params.max_speed()
            );
        }
        if omega_requested {
            info!("Omega maneuver queued.");
        }
        ThreatTransition { from, to: level, mode, params, omega_requested }
    }

    /// Manually forces a mission mode. The next threat update re-derives it.
    pub async fn override_mission_mode(&self, mode: MissionMode) {
        let _intake = self.intake.lock().await;
        self.store.update(|state| state.override_mission_mode(mode)).await;
        info!("Mission mode overridden to {mode}.");
    }

    /// Replaces the protection target wholesale. Invalid targets are rejected
    /// and the previous target stays active.
    pub async fn set_target(&self, target: ProtectionTarget) -> Result<(), ConfigurationError> {
        target.validate()?;
        let _intake = self.intake.lock().await;
        if target.is_engaged() {
            let kind = if target.is_moving() { "moving" } else { "static" };
            info!("Protection target set: {} ({kind}) at {}", target.id(), target.position());
        } else {
            info!("Protection target cleared.");
        }
        *self.target.write().await = target;
        Ok(())
    }

    /// The engaged target, `None` if protection is disabled.
    pub async fn target(&self) -> Option<ProtectionTarget> {
        let target = self.target.read().await;
        target.is_engaged().then(|| target.clone())
    }

    pub async fn threat_location(&self) -> Option<Position> { *self.threat_location.read().await }

    pub fn omega(&self) -> &OmegaLatch { &self.omega }

    /// Replaces any pending waypoint. Validation is up to the caller.
    pub async fn set_waypoint(&self, waypoint: Waypoint) {
        let _intake = self.intake.lock().await;
        if self.waypoint.write().await.replace(waypoint).is_some() {
            warn!("Pending waypoint replaced.");
        }
        info!("Navigating to {}.", waypoint.position());
    }

    pub async fn waypoint(&self) -> Option<Waypoint> { *self.waypoint.read().await }

    /// Drops the pending waypoint if it is still `reached`, returns whether it did.
    pub async fn clear_waypoint(&self, reached: &Waypoint) -> bool {
        let mut slot = self.waypoint.write().await;
        if slot.as_ref() != Some(reached) {
            return false;
        }
        *slot = None;
        true
    }
}
