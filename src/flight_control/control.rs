use super::{flight_state::FlightStateStore, navigation::NavCommand};
use crate::hal::{FlightHal, HalBackend, HardwareError};
use crate::scheduling::PeriodicTask;
use crate::{error, event, warn};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{Instant, timeout_at},
};

/// Fastest loop: refreshes the flight state from the sensors and forwards
/// the latest navigation target to the hardware.
pub struct ControlTask {
    store: Arc<FlightStateStore>,
    hal: Arc<HalBackend>,
    nav: watch::Receiver<NavCommand>,
    /// Shared budget of the sensor read and the command dispatch of one tick.
    hw_timeout: Duration,
    max_failures: u32,
}

impl ControlTask {
    pub fn new(
        store: Arc<FlightStateStore>,
        hal: Arc<HalBackend>,
        nav: watch::Receiver<NavCommand>,
        hw_timeout: Duration,
        max_failures: u32,
    ) -> Self {
        Self { store, hal, nav, hw_timeout, max_failures }
    }

    async fn refresh_sensors(&self, deadline: Instant) {
        match timeout_at(deadline, self.hal.read_sensors()).await {
            Ok(Ok(snapshot)) => {
                let now = Instant::now();
                self.store.update(|state| state.apply_sensors(&snapshot, now)).await;
            }
            Ok(Err(e)) => self.link_failure("sensor read", &e).await,
            Err(elapsed) => self.link_failure("sensor read", &HardwareError::from(elapsed)).await,
        }
    }

    async fn link_failure(&self, what: &str, e: &HardwareError) {
        let streak = self.store.update(|state| state.record_link_failure()).await;
        if streak == 1 {
            warn!("Hardware {what} failed: {e}. Retrying next tick.");
        } else if streak == self.max_failures {
            error!("Hardware link lost after {streak} consecutive failures (last: {e}).");
        } else {
            event!("Hardware {what} failed ({streak} in a row): {e}");
        }
    }
}

#[async_trait]
impl PeriodicTask for ControlTask {
    fn name(&self) -> &'static str { "control" }

    async fn tick(&mut self) {
        let deadline = Instant::now() + self.hw_timeout;
        self.refresh_sensors(deadline).await;

        let state = self.store.read().await;
        // navigation output is ignored while landing or disarmed
        if !state.armed() || state.flight_mode().is_terminal() {
            return;
        }
        let cmd = *self.nav.borrow_and_update();
        let Some(target) = cmd.target else { return };

        let result = timeout_at(deadline, self.hal.send_position_command(target, cmd.speed))
            .await
            .map_err(HardwareError::from)
            .and_then(|res| res);
        match result {
            Ok(()) => {
                let now = Instant::now();
                self.store.update(|state| state.record_link_success(now)).await;
                event!("CTRL {} to {target} at {:.1}m/s", cmd.action, cmd.speed);
            }
            Err(e) => self.link_failure("command", &e).await,
        }
    }
}
