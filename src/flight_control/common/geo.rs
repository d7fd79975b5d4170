use super::position::Position;
use chrono::{DateTime, Utc};
use std::f64::consts::TAU;
use std::time::Duration;

/// Mean earth radius of the spherical earth model in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two fixes using the haversine formula.
/// Altitude is ignored.
///
/// # Arguments
/// * `a` - The first position.
/// * `b` - The second position.
///
/// # Returns
/// The surface distance in meters.
pub fn haversine_distance(a: &Position, b: &Position) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let d_lat = (b.lat() - a.lat()).to_radians();
    let d_lon = (b.lon() - a.lon()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // clamp guards against h drifting above 1.0 for antipodal points
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `from` towards `to`.
///
/// # Returns
/// The bearing in degrees in `[0, 360)`, `0` being true north.
pub fn bearing(from: &Position, to: &Position) -> f64 {
    let lat1 = from.lat().to_radians();
    let lat2 = to.lat().to_radians();
    let d_lon = (to.lon() - from.lon()).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Point reached when travelling `distance` meters from `origin` along the
/// great circle with initial bearing `bearing_deg`. Altitude and heading of
/// `origin` are carried over.
pub fn destination_point(origin: &Position, bearing_deg: f64, distance: f64) -> Position {
    let lat1 = origin.lat().to_radians();
    let lon1 = origin.lon().to_radians();
    let brg = bearing_deg.to_radians();
    let ang = distance / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * ang.cos() + lat1.cos() * ang.sin() * brg.cos()).asin();
    let lon2 = lon1
        + (brg.sin() * ang.sin() * lat1.cos()).atan2(ang.cos() - lat1.sin() * lat2.sin());
    let lon2_norm = (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;

    let mut dest = Position::new(lat2.to_degrees(), lon2_norm, origin.alt())
        .with_timestamp(origin.timestamp());
    if let Some(h) = origin.heading() {
        dest = dest.with_heading(h);
    }
    dest
}

/// Bearing of the orbit sweep at time `t` for a full revolution every `period`.
///
/// The angle is derived from wall-clock time modulo the period, so
/// consecutive callers see continuous circular motion without keeping state.
#[allow(clippy::cast_precision_loss)]
pub fn orbit_bearing(t: DateTime<Utc>, period: Duration) -> f64 {
    let period_ms = period.as_millis().max(1) as i64;
    let phase = t.timestamp_millis().rem_euclid(period_ms) as f64 / period_ms as f64;
    (phase * TAU).to_degrees()
}

/// Point on the protective orbit of radius `radius` around `center` at time `t`.
pub fn orbit_point(center: &Position, radius: f64, t: DateTime<Utc>, period: Duration) -> Position {
    destination_point(center, orbit_bearing(t, period), radius)
}
