use crate::config::EscortConfig;
use crate::flight_control::{EmergencyLanding, FlightState, FlightStateStore, common::Position};
use crate::hal::HalBackend;
use crate::mode_control::{MissionStateMachine, OperatorAlert};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Struct bundling the shared components every periodic task and the
/// operator command surface work on.
#[derive(Clone)]
pub struct Keychain {
    /// The single flight state of the process.
    store: Arc<FlightStateStore>,
    /// The hardware backend selected at startup.
    hal: Arc<HalBackend>,
    /// Threat state machine and protection target owner.
    mission: Arc<MissionStateMachine>,
    /// The terminal landing path.
    landing: Arc<EmergencyLanding>,
    /// Sender side of the operator alert channel.
    alerts: broadcast::Sender<OperatorAlert>,
}

impl Keychain {
    const ALERT_BUFFER: usize = 32;

    /// Creates a new `Keychain` around `hal`, seeding the flight state at `home`.
    pub fn new(config: &EscortConfig, hal: HalBackend, home: Position) -> Self {
        let store = Arc::new(FlightStateStore::new(FlightState::new(home)));
        let hal = Arc::new(hal);
        let (alerts, _) = broadcast::channel(Self::ALERT_BUFFER);
        let mission = Arc::new(MissionStateMachine::new(Arc::clone(&store), home));
        let landing = Arc::new(EmergencyLanding::new(
            Arc::clone(&store),
            Arc::clone(&hal),
            config.descent_rate,
            config.ground_tolerance,
            config.landing_poll,
            config.hw_timeout,
            config.thresholds.max_consecutive_hw_failures,
            alerts.clone(),
        ));
        Self { store, hal, mission, landing, alerts }
    }

    /// Provides a cloned reference to the flight state store.
    pub fn store(&self) -> Arc<FlightStateStore> { Arc::clone(&self.store) }

    /// Provides a cloned reference to the hardware backend.
    pub fn hal(&self) -> Arc<HalBackend> { Arc::clone(&self.hal) }

    pub fn mission(&self) -> Arc<MissionStateMachine> { Arc::clone(&self.mission) }

    pub fn landing(&self) -> Arc<EmergencyLanding> { Arc::clone(&self.landing) }

    pub fn alert_tx(&self) -> broadcast::Sender<OperatorAlert> { self.alerts.clone() }

    /// Subscribes to operator alerts raised from now on.
    pub fn alerts(&self) -> broadcast::Receiver<OperatorAlert> { self.alerts.subscribe() }
}
