use std::{env, time::Duration};
use strum_macros::Display;

/// Errors raised when a threshold, rate or operator supplied value is unusable.
/// They are always raised before any shared state is touched, so the previous
/// valid configuration stays in effect.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    NonPositiveRadius,
    InvalidCoordinates,
    AltitudeOutOfRange,
    InvalidThreshold(&'static str),
    InvalidRate(&'static str),
    TimeoutExceedsPeriod,
    MissingDriverUrl,
    Unparsable(&'static str),
}

impl std::error::Error for ConfigurationError {}

/// Which hardware backend the controller talks through.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum HalSelection {
    Simulated,
    Live,
}

/// Requested tick rates of the four periodic tasks in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskRates {
    pub control_hz: f64,
    pub nav_hz: f64,
    pub safety_hz: f64,
    pub telemetry_hz: f64,
}

impl TaskRates {
    pub fn control_period(&self) -> Duration { Self::period(self.control_hz) }
    pub fn nav_period(&self) -> Duration { Self::period(self.nav_hz) }
    pub fn safety_period(&self) -> Duration { Self::period(self.safety_hz) }
    pub fn telemetry_period(&self) -> Duration { Self::period(self.telemetry_hz) }

    fn period(hz: f64) -> Duration { Duration::from_secs_f64(1.0 / hz) }
}

impl Default for TaskRates {
    fn default() -> Self { Self { control_hz: 50.0, nav_hz: 30.0, safety_hz: 10.0, telemetry_hz: 1.0 } }
}

/// Limits the safety monitor evaluates the flight state against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyThresholds {
    /// Below this remaining battery percentage a warning is logged.
    pub battery_warning_pct: f64,
    /// Below this remaining battery percentage the emergency landing is forced.
    pub battery_critical_pct: f64,
    /// Minimum number of satellites for a healthy GPS solution.
    pub min_satellites: u8,
    /// Maximum silence of the hardware link before communication counts as lost.
    pub comm_timeout: Duration,
    /// Consecutive failed hardware exchanges before communication counts as lost.
    pub max_consecutive_hw_failures: u32,
    /// Regulatory altitude ceiling in meters above ground.
    pub max_altitude: f64,
    /// Distance below the ceiling the corrective descent aims for.
    pub ceiling_margin: f64,
    /// Speed of the corrective ceiling descent in m/s.
    pub ceiling_descent_speed: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            battery_warning_pct: 25.0,
            battery_critical_pct: 15.0,
            min_satellites: 6,
            comm_timeout: Duration::from_millis(3000),
            max_consecutive_hw_failures: 5,
            max_altitude: 120.0,
            ceiling_margin: 10.0,
            ceiling_descent_speed: 5.0,
        }
    }
}

impl SafetyThresholds {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let crit = self.battery_critical_pct;
        let warn = self.battery_warning_pct;
        if !(crit > 0.0 && crit < warn && warn <= 100.0) {
            return Err(ConfigurationError::InvalidThreshold("battery"));
        }
        if self.comm_timeout.is_zero() {
            return Err(ConfigurationError::InvalidThreshold("comm_timeout"));
        }
        if self.max_consecutive_hw_failures == 0 {
            return Err(ConfigurationError::InvalidThreshold("max_consecutive_hw_failures"));
        }
        if self.max_altitude <= self.ceiling_margin || self.ceiling_margin <= 0.0 {
            return Err(ConfigurationError::InvalidThreshold("ceiling"));
        }
        if self.ceiling_descent_speed <= 0.0 {
            return Err(ConfigurationError::InvalidThreshold("ceiling_descent_speed"));
        }
        Ok(())
    }
}

/// Complete runtime configuration of the escort controller.
#[derive(Debug, Clone)]
pub struct EscortConfig {
    pub rates: TaskRates,
    pub thresholds: SafetyThresholds,
    pub hal: HalSelection,
    /// Base URL of the external driver layer, only used by the live backend.
    pub driver_url: Option<String>,
    /// Upper bound of a single hardware call.
    pub hw_timeout: Duration,
    /// Emergency descent rate in m/s.
    pub descent_rate: f64,
    /// Altitude at which the aircraft counts as landed.
    pub ground_tolerance: f64,
    /// Interval between descent commands during the emergency landing.
    pub landing_poll: Duration,
    /// Lowest altitude a takeoff may target.
    pub min_safe_altitude: f64,
    /// Duration of one full revolution of the protective orbit.
    pub orbit_period: Duration,
    /// Every n-th telemetry record is printed by the log sink.
    pub telemetry_log_every: u64,
}

impl Default for EscortConfig {
    fn default() -> Self {
        Self {
            rates: TaskRates::default(),
            thresholds: SafetyThresholds::default(),
            hal: HalSelection::Simulated,
            driver_url: None,
            hw_timeout: Duration::from_millis(15),
            descent_rate: 1.0,
            ground_tolerance: 0.2,
            landing_poll: Duration::from_millis(100),
            min_safe_altitude: 2.0,
            orbit_period: Duration::from_secs(60),
            telemetry_log_every: 10,
        }
    }
}

impl EscortConfig {
    const DEF_DRIVER_URL: &'static str = "http://localhost:14550";

    /// Builds the configuration from `ESCORT_*` environment variables,
    /// falling back to the defaults for every unset variable.
    pub fn from_env() -> Result<Self, ConfigurationError> { Self::from_lookup(|key| env::var(key).ok()) }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where F: Fn(&str) -> Option<String> {
        let mut conf = Self::default();
        conf.hal = match lookup("ESCORT_HAL").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("simulated" | "sim") => HalSelection::Simulated,
            Some("live") => HalSelection::Live,
            Some(_) => return Err(ConfigurationError::Unparsable("ESCORT_HAL")),
        };
        conf.driver_url = match conf.hal {
            HalSelection::Live => {
                Some(lookup("ESCORT_DRIVER_URL").unwrap_or_else(|| Self::DEF_DRIVER_URL.to_string()))
            }
            HalSelection::Simulated => lookup("ESCORT_DRIVER_URL"),
        };
        conf.rates.control_hz = parse_or(&lookup, "ESCORT_CONTROL_HZ", conf.rates.control_hz)?;
        conf.rates.nav_hz = parse_or(&lookup, "ESCORT_NAV_HZ", conf.rates.nav_hz)?;
        conf.rates.safety_hz = parse_or(&lookup, "ESCORT_SAFETY_HZ", conf.rates.safety_hz)?;
        conf.rates.telemetry_hz = parse_or(&lookup, "ESCORT_TELEMETRY_HZ", conf.rates.telemetry_hz)?;

        let th = &mut conf.thresholds;
        th.battery_warning_pct = parse_or(&lookup, "ESCORT_BATT_WARN", th.battery_warning_pct)?;
        th.battery_critical_pct = parse_or(&lookup, "ESCORT_BATT_CRIT", th.battery_critical_pct)?;
        th.min_satellites = parse_or(&lookup, "ESCORT_MIN_SATS", th.min_satellites)?;
        let timeout_ms = parse_or(&lookup, "ESCORT_COMM_TIMEOUT_MS", 3000u64)?;
        th.comm_timeout = Duration::from_millis(timeout_ms);
        th.max_consecutive_hw_failures =
            parse_or(&lookup, "ESCORT_MAX_HW_FAILURES", th.max_consecutive_hw_failures)?;
        let hw_timeout_ms = parse_or(&lookup, "ESCORT_HW_TIMEOUT_MS", 15u64)?;
        conf.hw_timeout = Duration::from_millis(hw_timeout_ms);

        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let rates = [
            ("control_hz", self.rates.control_hz),
            ("nav_hz", self.rates.nav_hz),
            ("safety_hz", self.rates.safety_hz),
            ("telemetry_hz", self.rates.telemetry_hz),
        ];
        for (name, hz) in rates {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(ConfigurationError::InvalidRate(name));
            }
        }
        self.thresholds.validate()?;
        if self.hw_timeout >= self.rates.control_period() || self.hw_timeout.is_zero() {
            return Err(ConfigurationError::TimeoutExceedsPeriod);
        }
        if self.descent_rate <= 0.0 {
            return Err(ConfigurationError::InvalidThreshold("descent_rate"));
        }
        if self.ground_tolerance < 0.0 || self.min_safe_altitude <= self.ground_tolerance {
            return Err(ConfigurationError::InvalidThreshold("ground_tolerance"));
        }
        if self.hal == HalSelection::Live && self.driver_url.is_none() {
            return Err(ConfigurationError::MissingDriverUrl);
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigurationError::Unparsable(key)),
    }
}
