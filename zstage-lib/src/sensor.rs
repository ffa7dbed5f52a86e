//! Interface of the force/torque sensor that calibration sessions read
//! alongside stage positions. No driver lives in this crate.

use crate::axis::Position;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One reading from a six-axis force/torque sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorFrame {
    /// Force in newtons `[fx, fy, fz]`
    pub force: [f64; 3],
    /// Torque in newton-metres `[tx, ty, tz]`
    pub torque: [f64; 3],
    /// Temperature in °C
    pub temperature: f64,
}

pub trait ForceSensor {
    fn configure(&mut self) -> bool;
    fn tare(&mut self) -> bool;
    fn activate(&mut self) -> bool;
    fn deactivate(&mut self);
    fn shutdown(&mut self);
    fn read_frame(&mut self) -> SensorFrame;
}

/// A stage position together with the sensor reading taken there.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationSample {
    pub position: Position,
    pub reading: SensorFrame,
}
