use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};

/// A geodetic fix of the aircraft or of a protection target.
///
/// Altitude is measured in meters above ground level. Heading is optional
/// since not every source (e.g. an operator supplied target) carries one.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    lat: f64,
    /// Longitude in degrees.
    lon: f64,
    /// Altitude in meters above ground level.
    alt: f64,
    /// Heading in degrees, `0` being true north.
    heading: Option<f64>,
    /// Time at which this fix was taken.
    timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt, heading: None, timestamp: Utc::now() }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns a copy of this position at a different altitude.
    pub fn at_alt(&self, alt: f64) -> Self { Self { alt, ..*self } }

    pub fn lat(&self) -> f64 { self.lat }
    pub fn lon(&self) -> f64 { self.lon }
    pub fn alt(&self) -> f64 { self.alt }
    pub fn heading(&self) -> Option<f64> { self.heading }
    pub fn timestamp(&self) -> DateTime<Utc> { self.timestamp }

    /// Checks that latitude and longitude are finite and inside their geodetic ranges.
    pub fn is_valid_fix(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.alt.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.6}, {:.6}, {:.1}m]", self.lat, self.lon, self.alt)
    }
}

/// Linear (m/s, local north-east-up frame) and angular (rad/s) velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
}

impl Velocity {
    pub fn linear(vx: f64, vy: f64, vz: f64) -> Self {
        Self { vx, vy, vz, ..Self::default() }
    }

    /// Magnitude of the linear component.
    pub fn ground_speed(&self) -> f64 { (self.vx.powi(2) + self.vy.powi(2)).sqrt() }
}
