use super::{
    emergency_landing::{EmergencyError, EmergencyLanding, LandingOutcome},
    flight_state::{FlightMode, FlightState, FlightStateStore},
};
use crate::config::SafetyThresholds;
use crate::hal::{FlightHal, HalBackend, HardwareError};
use crate::mode_control::OperatorAlert;
use crate::scheduling::PeriodicTask;
use crate::{error, info, safety, warn};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{Instant, timeout},
};

/// Health of the aircraft as derived from one flight state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SafetyVerdict {
    pub gps_healthy: bool,
    /// Battery above the critical threshold.
    pub battery_healthy: bool,
    /// Battery below the warning threshold.
    pub battery_warning: bool,
    pub communication_healthy: bool,
    /// Altitude at or below the regulatory ceiling.
    pub altitude_ok: bool,
    pub critical_failure: bool,
    pub degraded_performance: bool,
}

impl SafetyVerdict {
    pub const NOMINAL: Self = Self {
        gps_healthy: true,
        battery_healthy: true,
        battery_warning: false,
        communication_healthy: true,
        altitude_ok: true,
        critical_failure: false,
        degraded_performance: false,
    };

    pub fn evaluate(state: &FlightState, thresholds: &SafetyThresholds, now: Instant) -> Self {
        let gps_healthy = state.gps_lock() && state.satellites() >= thresholds.min_satellites;
        let battery_healthy = state.battery_pct() >= thresholds.battery_critical_pct;
        let battery_warning = state.battery_pct() < thresholds.battery_warning_pct;
        let silence = now.saturating_duration_since(state.last_contact());
        let communication_healthy = state.consecutive_hw_failures() < thresholds.max_consecutive_hw_failures
            && silence <= thresholds.comm_timeout;
        let altitude_ok = state.position().alt() <= thresholds.max_altitude;
        Self {
            gps_healthy,
            battery_healthy,
            battery_warning,
            communication_healthy,
            altitude_ok,
            critical_failure: !battery_healthy || !communication_healthy,
            degraded_performance: !gps_healthy || battery_warning,
        }
    }
}

impl Default for SafetyVerdict {
    fn default() -> Self { Self::NOMINAL }
}

/// What a single safety tick decided to do. Mostly useful for tests and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyAction {
    None,
    EmergencyLanding,
    AltitudeHoldForced,
    AltitudeHoldReleased,
    CeilingDescent,
}

/// Periodic safety supervision. Critical failures are handled before
/// degraded performance, which is handled before routine corrections.
pub struct SafetyMonitor {
    store: Arc<FlightStateStore>,
    hal: Arc<HalBackend>,
    landing: Arc<EmergencyLanding>,
    thresholds: SafetyThresholds,
    hw_timeout: Duration,
    alerts: broadcast::Sender<OperatorAlert>,
    verdict_tx: watch::Sender<SafetyVerdict>,
    last: SafetyVerdict,
    /// Set once the ceiling descent was commanded, cleared below the ceiling.
    ceiling_latched: bool,
    landing_task: Option<JoinHandle<Result<LandingOutcome, EmergencyError>>>,
}

impl SafetyMonitor {
    pub fn new(
        store: Arc<FlightStateStore>,
        hal: Arc<HalBackend>,
        landing: Arc<EmergencyLanding>,
        thresholds: SafetyThresholds,
        hw_timeout: Duration,
        alerts: broadcast::Sender<OperatorAlert>,
        verdict_tx: watch::Sender<SafetyVerdict>,
    ) -> Self {
        Self {
            store,
            hal,
            landing,
            thresholds,
            hw_timeout,
            alerts,
            verdict_tx,
            last: SafetyVerdict::NOMINAL,
            ceiling_latched: false,
            landing_task: None,
        }
    }

    /// Evaluates the current state and applies the highest priority reaction.
    pub async fn evaluate_and_act(&mut self) -> (SafetyVerdict, SafetyAction) {
        self.reap_landing().await;
        let state = self.store.read().await;
        let verdict = SafetyVerdict::evaluate(&state, &self.thresholds, Instant::now());
        let action = if state.flight_mode() == FlightMode::Disarmed {
            SafetyAction::None
        } else if verdict.critical_failure {
            self.handle_critical(&state, &verdict).await
        } else {
            let mut action = self.handle_degraded(&state, &verdict).await;
            if action == SafetyAction::None {
                action = self.handle_ceiling(&state, &verdict).await;
            }
            action
        };
        if verdict != self.last {
            safety!(
                "Verdict changed: critical={}, degraded={}, gps={}, battery={:.1}%, comm={}",
                verdict.critical_failure,
                verdict.degraded_performance,
                verdict.gps_healthy,
                state.battery_pct(),
                verdict.communication_healthy
            );
        }
        self.last = verdict;
        self.verdict_tx.send_replace(verdict);
        (verdict, action)
    }

    async fn handle_critical(&mut self, state: &FlightState, verdict: &SafetyVerdict) -> SafetyAction {
        if !verdict.communication_healthy && self.last.communication_healthy {
            error!("Communication with the flight controller lost.");
            let _ = self.alerts.send(OperatorAlert::CommunicationLost);
        }
        // a landing that is running or has failed is not restarted from here
        if state.flight_mode().is_terminal() {
            return SafetyAction::None;
        }
        let reason = if verdict.battery_healthy {
            String::from("communication lost")
        } else {
            format!("battery critical at {:.1}%", state.battery_pct())
        };
        if !self.landing.force(&reason).await {
            return SafetyAction::None;
        }
        let landing = Arc::clone(&self.landing);
        self.landing_task = Some(tokio::spawn(async move { landing.engage(&reason).await }));
        SafetyAction::EmergencyLanding
    }

    async fn handle_degraded(&self, state: &FlightState, verdict: &SafetyVerdict) -> SafetyAction {
        if verdict.battery_warning && !self.last.battery_warning {
            warn!("Battery low: {:.1}% remaining.", state.battery_pct());
        }
        if !verdict.gps_healthy {
            if self.store.update(|s| s.force_altitude_hold()).await {
                safety!(
                    "GPS degraded (lock: {}, {} satellites): ALTITUDE_HOLD forced.",
                    state.gps_lock(),
                    state.satellites()
                );
                return SafetyAction::AltitudeHoldForced;
            }
        } else if state.flight_mode() == FlightMode::AltitudeHold
            && self.store.update(|s| s.release_altitude_hold()).await
        {
            safety!("GPS healthy again, resuming protection.");
            return SafetyAction::AltitudeHoldReleased;
        }
        SafetyAction::None
    }

    async fn handle_ceiling(&mut self, state: &FlightState, verdict: &SafetyVerdict) -> SafetyAction {
        if verdict.altitude_ok {
            self.ceiling_latched = false;
            return SafetyAction::None;
        }
        if self.ceiling_latched || !state.armed() {
            return SafetyAction::None;
        }
        let floor = self.thresholds.max_altitude - self.thresholds.ceiling_margin;
        let target = state.position().at_alt(floor);
        warn!("Altitude {:.1}m above ceiling, descending to {floor:.1}m.", state.position().alt());
        let sent = timeout(
            self.hw_timeout,
            self.hal.send_position_command(target, self.thresholds.ceiling_descent_speed),
        )
        .await
        .map_err(HardwareError::from)
        .and_then(|res| res);
        match sent {
            Ok(()) => {
                self.ceiling_latched = true;
                SafetyAction::CeilingDescent
            }
            Err(e) => {
                warn!("Ceiling descent command failed: {e}. Retrying next tick.");
                SafetyAction::None
            }
        }
    }

    async fn reap_landing(&mut self) {
        if !self.landing_task.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        if let Some(handle) = self.landing_task.take() {
            match handle.await {
                Ok(Ok(outcome)) => info!("Emergency landing finished: {outcome}."),
                Ok(Err(e)) => error!("Emergency landing aborted: {e}"),
                Err(e) => error!("Emergency landing task failed: {e}"),
            }
        }
    }

    /// Waits for a landing started by this monitor, if any.
    pub async fn join_landing(&mut self) -> Option<Result<LandingOutcome, EmergencyError>> {
        let handle = self.landing_task.take()?;
        handle.await.ok()
    }
}

#[async_trait]
impl PeriodicTask for SafetyMonitor {
    fn name(&self) -> &'static str { "safety" }

    async fn tick(&mut self) { self.evaluate_and_act().await; }
}
