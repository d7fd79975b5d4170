//! Hardware abstraction boundary between the control core and the external
//! driver layer that owns the flight controller wire protocol.

mod hal_common;
pub(crate) mod live;
pub(crate) mod simulated;

pub(crate) use hal_common::{FlightHal, HalBackend, HardwareError, SensorSnapshot};
