use crate::config::ConfigurationError;
use crate::flight_control::common::{Position, geo::haversine_distance};

/// Operator commanded point the aircraft flies to ahead of its protective orbit.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Waypoint {
    position: Position,
    /// Requested speed in m/s, `None` flies at the current maximum.
    speed: Option<f64>,
}

impl Waypoint {
    /// Distance in meters at which the waypoint counts as reached.
    pub const ARRIVAL_RADIUS: f64 = 1.0;

    pub fn new(position: Position, speed: Option<f64>) -> Self { Self { position, speed } }

    pub fn position(&self) -> &Position { &self.position }

    /// Speed to fly at, never above `max_speed`.
    pub fn capped_speed(&self, max_speed: f64) -> f64 { self.speed.map_or(max_speed, |s| s.min(max_speed)) }

    pub fn reached(&self, current: &Position) -> bool {
        let d_h = haversine_distance(current, &self.position);
        d_h.hypot(self.position.alt() - current.alt()) <= Self::ARRIVAL_RADIUS
    }

    /// Rejects waypoints off the globe, outside `[min_alt, max_alt]` or with a non-positive speed.
    pub fn validate(&self, min_alt: f64, max_alt: f64) -> Result<(), ConfigurationError> {
        if !self.position.is_valid_fix() {
            return Err(ConfigurationError::InvalidCoordinates);
        }
        if !(min_alt..=max_alt).contains(&self.position.alt()) {
            return Err(ConfigurationError::AltitudeOutOfRange);
        }
        if self.speed.is_some_and(|s| !s.is_finite() || s <= 0.0) {
            return Err(ConfigurationError::InvalidThreshold("speed"));
        }
        Ok(())
    }
}
