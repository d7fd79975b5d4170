use crate::config::ConfigurationError;
use crate::flight_control::common::Position;

/// The asset the aircraft guards. An empty identifier means no target is
/// engaged and protection behavior stays disabled.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProtectionTarget {
    id: String,
    position: Position,
    /// Protection radius in meters.
    radius: f64,
    moving: bool,
}

impl ProtectionTarget {
    pub fn new(id: impl Into<String>, position: Position, radius: f64, moving: bool) -> Self {
        Self { id: id.into(), position, radius, moving }
    }

    /// A target with an empty identifier that disables protection.
    pub fn cleared(position: Position) -> Self {
        Self { id: String::new(), position, radius: 1.0, moving: false }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn position(&self) -> &Position { &self.position }
    pub fn radius(&self) -> f64 { self.radius }
    pub fn is_moving(&self) -> bool { self.moving }
    pub fn is_engaged(&self) -> bool { !self.id.trim().is_empty() }

    /// Rejects malformed targets before they can replace the current one.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(ConfigurationError::NonPositiveRadius);
        }
        if !self.position.is_valid_fix() {
            return Err(ConfigurationError::InvalidCoordinates);
        }
        Ok(())
    }
}
