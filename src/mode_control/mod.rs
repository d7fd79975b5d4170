//! Threat-to-behavior state machine: threat levels, the mission modes and
//! control parameters derived from them, the protection target and the
//! operator waypoint.

pub(crate) mod mission_control;
pub(crate) mod mission_mode;
mod protection_target;
mod signal;
mod waypoint;

pub(crate) use mission_control::{MissionStateMachine, OmegaLatch};
pub(crate) use mission_mode::{ControlParameters, MissionMode, ThreatLevel};
pub(crate) use protection_target::ProtectionTarget;
pub(crate) use signal::{OperatorAlert, ThreatTransition};
pub(crate) use waypoint::Waypoint;
