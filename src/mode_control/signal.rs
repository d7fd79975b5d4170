use super::mission_mode::{ControlParameters, MissionMode, ThreatLevel};
use strum_macros::Display;

/// Alerts pushed to the operator independently of telemetry.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum OperatorAlert {
    EmergencyLandingEngaged(String),
    LandingFailed(String),
    CommunicationLost,
    Disarmed,
}

/// Result of a threat update as seen by the command surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreatTransition {
    pub from: ThreatLevel,
    pub to: ThreatLevel,
    pub mode: MissionMode,
    pub params: ControlParameters,
    /// Whether this update queued a new omega maneuver.
    pub omega_requested: bool,
}
