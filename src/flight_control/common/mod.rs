pub(crate) mod geo;
pub(crate) mod position;

pub use position::{Position, Velocity};
