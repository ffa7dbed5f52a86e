// Protocol and bench constants for the stage controllers

use std::time::Duration;

/// Size of every request and response frame on the wire (6 bytes)
pub const FRAME_SIZE: usize = 6;

/// Serial line speed expected by the controllers
pub const BAUD_RATE: u32 = 9600;

/// Deadline from write completion to a complete response frame
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on how long a single blocking serial read may sleep
/// before the deadline is checked again.
pub const READ_GRANULARITY: Duration = Duration::from_millis(10);

/// Distance travelled per microstep on the LSM series (mm)
pub const LSM_STEP_SIZE_MM: f64 = 0.000047625;

/// Total steps for LSM100A: 101.6 / 0.000047625
pub const LSM100A_TOTAL_STEPS: u32 = 2_133_333;

/// Total steps for LSM050A: 50.8 / 0.000047625
pub const LSM050A_TOTAL_STEPS: u32 = 1_066_666;

/// Conventional unit ids on the shared line
pub const UNIT_X: u8 = 1;
pub const UNIT_Y: u8 = 2;
pub const UNIT_Z: u8 = 3;
