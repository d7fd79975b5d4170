use crate::flight_control::common::{Position, Velocity};
use crate::hal::SensorSnapshot;

pub(crate) enum DriverMethod {
    Get,
    Put,
}

/// One typed endpoint of the driver layer.
pub(crate) trait DriverRequest {
    type Response: for<'de> serde::Deserialize<'de>;
    type Body: serde::Serialize;
    fn endpoint(&self) -> &'static str;
    fn method(&self) -> DriverMethod;
    fn body(&self) -> &Self::Body;
}

/// Generic acknowledgement returned by every command endpoint.
#[derive(serde::Deserialize, Debug)]
pub(crate) struct DriverAck {
    pub(crate) accepted: bool,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

/// Request type for the /sensors endpoint.
#[derive(serde::Serialize, Debug)]
pub(crate) struct SensorsRequest;

/// Raw sensor frame as published by the driver layer.
#[derive(serde::Deserialize, Debug)]
pub(crate) struct SensorResponse {
    lat: f64,
    lon: f64,
    alt: f64,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default)]
    vx: f64,
    #[serde(default)]
    vy: f64,
    #[serde(default)]
    vz: f64,
    battery_voltage: f64,
    battery_pct: f64,
    gps_lock: bool,
    satellites: u8,
}

impl From<SensorResponse> for SensorSnapshot {
    fn from(raw: SensorResponse) -> Self {
        let mut position = Position::new(raw.lat, raw.lon, raw.alt);
        if let Some(heading) = raw.heading {
            position = position.with_heading(heading);
        }
        SensorSnapshot {
            position,
            velocity: Velocity::linear(raw.vx, raw.vy, raw.vz),
            battery_voltage: raw.battery_voltage,
            battery_pct: raw.battery_pct,
            gps_lock: raw.gps_lock,
            satellites: raw.satellites,
        }
    }
}

impl DriverRequest for SensorsRequest {
    type Response = SensorResponse;
    type Body = ();
    fn endpoint(&self) -> &'static str { "/sensors" }
    fn method(&self) -> DriverMethod { DriverMethod::Get }
    fn body(&self) -> &Self::Body { &() }
}

/// Request type for the /command/position endpoint.
#[derive(serde::Serialize, Debug)]
pub(crate) struct PositionCommandRequest {
    pub(crate) lat: f64,
    pub(crate) lon: f64,
    pub(crate) alt: f64,
    /// Requested ground speed in m/s.
    pub(crate) speed: f64,
}

impl DriverRequest for PositionCommandRequest {
    type Response = DriverAck;
    type Body = PositionCommandRequest;
    fn endpoint(&self) -> &'static str { "/command/position" }
    fn method(&self) -> DriverMethod { DriverMethod::Put }
    fn body(&self) -> &Self::Body { self }
}

/// Request type for the /arm and /disarm endpoints.
#[derive(serde::Serialize, Debug)]
pub(crate) struct ArmingRequest {
    pub(crate) armed: bool,
}

impl DriverRequest for ArmingRequest {
    type Response = DriverAck;
    type Body = ArmingRequest;
    fn endpoint(&self) -> &'static str { if self.armed { "/arm" } else { "/disarm" } }
    fn method(&self) -> DriverMethod { DriverMethod::Put }
    fn body(&self) -> &Self::Body { self }
}
