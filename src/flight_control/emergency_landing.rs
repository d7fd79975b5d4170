use super::{
    common::Position,
    flight_state::{FlightMode, FlightStateStore},
};
use crate::hal::{FlightHal, HalBackend, HardwareError};
use crate::mode_control::OperatorAlert;
use crate::{error, info, log, safety, warn};
use std::{sync::Arc, time::Duration};
use strum_macros::Display;
use tokio::{
    sync::{Mutex, broadcast},
    time::{Instant, interval, timeout},
};

/// Failure of the emergency landing path. This is the only error that is
/// never recovered automatically.
#[derive(Debug, Display)]
pub enum EmergencyError {
    Unrecoverable(HardwareError),
}

impl std::error::Error for EmergencyError {}

impl From<HardwareError> for EmergencyError {
    fn from(value: HardwareError) -> Self { EmergencyError::Unrecoverable(value) }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Display)]
pub enum LandingOutcome {
    /// This call drove the aircraft to the ground and disarmed it.
    Landed,
    /// The aircraft was already disarmed, nothing was done.
    AlreadyDisarmed,
}

/// Terminal path `ACTIVE -> EMERGENCY_LAND -> DISARMED`.
///
/// Concurrent callers are serialized; whoever comes second finds the
/// aircraft disarmed and returns without touching the hardware.
pub struct EmergencyLanding {
    store: Arc<FlightStateStore>,
    hal: Arc<HalBackend>,
    /// Vertical speed of the controlled descent in m/s.
    descent_rate: f64,
    ground_tolerance: f64,
    poll: Duration,
    hw_timeout: Duration,
    /// Consecutive hardware failures tolerated before giving up.
    max_failures: u32,
    guard: Mutex<()>,
    alerts: broadcast::Sender<OperatorAlert>,
}

impl EmergencyLanding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<FlightStateStore>,
        hal: Arc<HalBackend>,
        descent_rate: f64,
        ground_tolerance: f64,
        poll: Duration,
        hw_timeout: Duration,
        max_failures: u32,
        alerts: broadcast::Sender<OperatorAlert>,
    ) -> Self {
        Self {
            store,
            hal,
            descent_rate,
            ground_tolerance,
            poll,
            hw_timeout,
            max_failures,
            guard: Mutex::new(()),
            alerts,
        }
    }

    /// Switches the flight mode to `EmergencyLand` without driving the descent.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// aircraft already was on the terminal path.
    pub async fn force(&self, reason: &str) -> bool {
        let prev = self.store.update(|state| state.enter_emergency_land()).await;
        if prev.is_terminal() {
            return false;
        }
        safety!("EMERGENCY_LAND forced from {prev}: {reason}");
        let _ = self.alerts.send(OperatorAlert::EmergencyLandingEngaged(reason.to_string()));
        true
    }

    /// Runs the landing protocol to completion.
    ///
    /// Descends vertically over the position held at entry until the ground
    /// is reached, then disarms. Calling this while already disarmed is a no-op.
    pub async fn engage(&self, reason: &str) -> Result<LandingOutcome, EmergencyError> {
        let _guard = self.guard.lock().await;
        if self.store.read().await.flight_mode() == FlightMode::Disarmed {
            log!("Emergency landing requested ({reason}), aircraft already disarmed.");
            return Ok(LandingOutcome::AlreadyDisarmed);
        }
        self.force(reason).await;

        let state = self.store.read().await;
        if !state.armed() {
            self.finish().await;
            return Ok(LandingOutcome::Landed);
        }
        let touchdown = state.position().at_alt(0.0);
        info!("Descending to {touchdown} at {:.1}m/s.", self.descent_rate);

        let mut ticker = interval(self.poll);
        let mut failures = 0;
        loop {
            ticker.tick().await;
            match self.descend_step(&touchdown).await {
                Ok(alt) if alt <= self.ground_tolerance => break,
                Ok(_) => failures = 0,
                Err(e) => failures = self.landing_failure(failures, e)?,
            }
        }

        failures = 0;
        loop {
            match timeout(self.hw_timeout, self.hal.disarm()).await.map_err(HardwareError::from) {
                Ok(Ok(())) => break,
                Ok(Err(e)) | Err(e) => failures = self.landing_failure(failures, e)?,
            }
            ticker.tick().await;
        }
        self.finish().await;
        Ok(LandingOutcome::Landed)
    }

    async fn descend_step(&self, touchdown: &Position) -> Result<f64, HardwareError> {
        let snapshot = timeout(self.hw_timeout, self.hal.read_sensors()).await??;
        let now = Instant::now();
        self.store.update(|state| state.apply_sensors(&snapshot, now)).await;
        let alt = snapshot.position.alt();
        if alt > self.ground_tolerance {
            timeout(self.hw_timeout, self.hal.send_position_command(*touchdown, self.descent_rate)).await??;
        }
        Ok(alt)
    }

    fn landing_failure(&self, previous: u32, e: HardwareError) -> Result<u32, EmergencyError> {
        let failures = previous + 1;
        if failures < self.max_failures {
            warn!("Emergency landing step failed ({failures}/{}): {e}", self.max_failures);
            return Ok(failures);
        }
        error!("Emergency landing failed, operator intervention required: {e}");
        let _ = self.alerts.send(OperatorAlert::LandingFailed(e.to_string()));
        Err(EmergencyError::Unrecoverable(e))
    }

    async fn finish(&self) {
        self.store.update(|state| state.complete_landing()).await;
        info!("Aircraft landed and disarmed.");
        let _ = self.alerts.send(OperatorAlert::Disarmed);
    }
}
