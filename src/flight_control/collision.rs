use super::{common::Position, flight_state::FlightState};

/// Result of one collision risk check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionAssessment {
    pub risk: bool,
    /// Where to steer instead. Only meaningful while `risk` is set.
    pub avoidance_target: Option<Position>,
}

impl CollisionAssessment {
    pub const CLEAR: Self = Self { risk: false, avoidance_target: None };

    pub fn avoid(target: Position) -> Self { Self { risk: true, avoidance_target: Some(target) } }
}

/// Call point for an external obstacle model. Navigation consults it on every tick.
pub trait CollisionDetector: Send + Sync {
    fn assess(&self, state: &FlightState) -> CollisionAssessment;
}

/// Detector used when no obstacle sensing is fitted. Never reports a risk.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCollisionSensor;

impl CollisionDetector for NoCollisionSensor {
    fn assess(&self, _state: &FlightState) -> CollisionAssessment { CollisionAssessment::CLEAR }
}
