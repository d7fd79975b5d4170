use super::{live::LiveHal, simulated::SimulatedHal};
use crate::flight_control::common::{Position, Velocity};
use async_trait::async_trait;
use strum_macros::Display;

/// Failures of the hardware abstraction boundary.
#[derive(Debug, Display)]
pub enum HardwareError {
    /// The call did not finish inside its time budget.
    Timeout,
    /// The driver layer or flight controller could not be reached.
    LinkDown,
    /// The driver layer refused the request.
    Rejected(String),
    /// Transport level failure while talking to the driver layer.
    Transport(reqwest::Error),
    /// A movement command was sent to a disarmed aircraft.
    NotArmed,
}

impl std::error::Error for HardwareError {}

impl From<reqwest::Error> for HardwareError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            HardwareError::Timeout
        } else if value.is_connect() {
            HardwareError::LinkDown
        } else {
            HardwareError::Transport(value)
        }
    }
}

impl From<tokio::time::error::Elapsed> for HardwareError {
    fn from(_: tokio::time::error::Elapsed) -> Self { HardwareError::Timeout }
}

/// One fused sensor reading as delivered by the driver layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub position: Position,
    pub velocity: Velocity,
    pub battery_voltage: f64,
    pub battery_pct: f64,
    pub gps_lock: bool,
    pub satellites: u8,
}

/// Narrow interface the control core drives the aircraft through.
///
/// Implementations must be non-blocking or bound every call by a timeout.
#[async_trait]
pub trait FlightHal: Send + Sync {
    fn backend_name(&self) -> &'static str;
    async fn send_position_command(&self, target: Position, speed: f64) -> Result<(), HardwareError>;
    async fn read_sensors(&self) -> Result<SensorSnapshot, HardwareError>;
    async fn arm(&self) -> Result<(), HardwareError>;
    async fn disarm(&self) -> Result<(), HardwareError>;
}

/// Hardware backend, selected once at construction.
pub enum HalBackend {
    Simulated(SimulatedHal),
    Live(LiveHal),
}

impl HalBackend {
    pub fn as_simulated(&self) -> Option<&SimulatedHal> {
        match self {
            HalBackend::Simulated(sim) => Some(sim),
            HalBackend::Live(_) => None,
        }
    }
}

#[async_trait]
impl FlightHal for HalBackend {
    fn backend_name(&self) -> &'static str {
        match self {
            HalBackend::Simulated(sim) => sim.backend_name(),
            HalBackend::Live(live) => live.backend_name(),
        }
    }

    async fn send_position_command(&self, target: Position, speed: f64) -> Result<(), HardwareError> {
        match self {
            HalBackend::Simulated(sim) => sim.send_position_command(target, speed).await,
            HalBackend::Live(live) => live.send_position_command(target, speed).await,
        }
    }

    async fn read_sensors(&self) -> Result<SensorSnapshot, HardwareError> {
        match self {
            HalBackend::Simulated(sim) => sim.read_sensors().await,
            HalBackend::Live(live) => live.read_sensors().await,
        }
    }

    async fn arm(&self) -> Result<(), HardwareError> {
        match self {
            HalBackend::Simulated(sim) => sim.arm().await,
            HalBackend::Live(live) => live.arm().await,
        }
    }

    async fn disarm(&self) -> Result<(), HardwareError> {
        match self {
            HalBackend::Simulated(sim) => sim.disarm().await,
            HalBackend::Live(live) => live.disarm().await,
        }
    }
}
