use std::collections::HashMap;
use std::sync::LazyLock;
use strum_macros::{Display, EnumIter, EnumString};

/// Externally supplied threat severity, totally ordered from `Green` to `Omega`.
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Display, EnumIter, EnumString,
    serde::Serialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ThreatLevel {
    Green,
    Yellow,
    Orange,
    Red,
    Omega,
}

impl ThreatLevel {
    pub fn ordinal(self) -> u8 {
        match self {
            ThreatLevel::Green => 0,
            ThreatLevel::Yellow => 1,
            ThreatLevel::Orange => 2,
            ThreatLevel::Red => 3,
            ThreatLevel::Omega => 4,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(ThreatLevel::Green),
            1 => Some(ThreatLevel::Yellow),
            2 => Some(ThreatLevel::Orange),
            3 => Some(ThreatLevel::Red),
            4 => Some(ThreatLevel::Omega),
            _ => None,
        }
    }
}

/// Behavioral state derived one-to-one from the current [`ThreatLevel`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Display, EnumIter, EnumString, serde::Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MissionMode {
    Patrol,
    EnhancedWatch,
    Defensive,
    ActiveProtection,
    OmegaProtocol,
}

impl From<ThreatLevel> for MissionMode {
    fn from(value: ThreatLevel) -> Self {
        match value {
            ThreatLevel::Green => MissionMode::Patrol,
            ThreatLevel::Yellow => MissionMode::EnhancedWatch,
            ThreatLevel::Orange => MissionMode::Defensive,
            ThreatLevel::Red => MissionMode::ActiveProtection,
            ThreatLevel::Omega => MissionMode::OmegaProtocol,
        }
    }
}

/// Flight envelope the navigation task works with for one threat level.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ControlParameters {
    /// Radius of the protective orbit around the target in meters.
    orbit_radius: f64,
    /// Speed cap in m/s.
    max_speed: f64,
    /// Altitude added on top of the base patrol altitude in meters.
    altitude_offset: f64,
}

impl ControlParameters {
    /// Patrol altitude at threat level `Green`.
    pub const BASE_ALTITUDE: f64 = 10.0;
    /// Altitude gained per escalation step.
    const ALTITUDE_STEP: f64 = 5.0;

    pub fn for_threat(level: ThreatLevel) -> Self { CONTROL_PARAMS_LOOKUP[&level] }

    pub fn orbit_radius(&self) -> f64 { self.orbit_radius }
    pub fn max_speed(&self) -> f64 { self.max_speed }
    pub fn altitude_offset(&self) -> f64 { self.altitude_offset }
    pub fn target_altitude(&self) -> f64 { Self::BASE_ALTITUDE + self.altitude_offset }
}

static CONTROL_PARAMS_LOOKUP: LazyLock<HashMap<ThreatLevel, ControlParameters>> =
    LazyLock::new(|| {
        let mut lookup = HashMap::new();
        let table = vec![
            (ThreatLevel::Green, 15.0, 10.0),
            (ThreatLevel::Yellow, 12.0, 12.0),
            (ThreatLevel::Orange, 8.0, 15.0),
            (ThreatLevel::Red, 5.0, 20.0),
            (ThreatLevel::Omega, 3.0, 25.0),
        ];

        for (level, orbit_radius, max_speed) in table {
            let altitude_offset = ControlParameters::ALTITUDE_STEP * f64::from(level.ordinal());
            lookup.insert(level, ControlParameters { orbit_radius, max_speed, altitude_offset });
        }
        lookup
    });
