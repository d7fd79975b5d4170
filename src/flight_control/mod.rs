pub(crate) mod collision;
pub(crate) mod common;
pub(crate) mod control;
pub(crate) mod emergency_landing;
pub(crate) mod flight_state;
pub(crate) mod navigation;
pub(crate) mod safety_monitor;
pub(crate) mod telemetry;

#[cfg(test)]
mod tests;

pub use collision::{CollisionAssessment, CollisionDetector, NoCollisionSensor};
pub use control::ControlTask;
pub use emergency_landing::{EmergencyError, EmergencyLanding, LandingOutcome};
pub use flight_state::{FlightMode, FlightState, FlightStateStore};
pub use navigation::{NavCommand, NavInputs, NavigationTask, Navigator, OmegaManeuver, SteerAction};
pub use safety_monitor::{SafetyAction, SafetyMonitor, SafetyVerdict};
pub use telemetry::{ChannelSink, LogSink, TelemetryRecord, TelemetrySink, TelemetryTask};
