use crate::constants::{UNIT_X, UNIT_Y, UNIT_Z};
use std::fmt;
use std::ops::{Index, IndexMut};
use strum_macros::{Display, EnumString};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One independently controlled linear stage on the shared line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[strum(ascii_case_insensitive)]
pub enum Axis {
    #[strum(serialize = "X")]
    X,
    #[strum(serialize = "Y")]
    Y,
    #[strum(serialize = "Z")]
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Unit id this axis answers to by bench convention
    pub fn default_unit_id(&self) -> u8 {
        match self {
            Axis::X => UNIT_X,
            Axis::Y => UNIT_Y,
            Axis::Z => UNIT_Z,
        }
    }

    /// Parse a compact order string such as `"zyx"` into a move order.
    pub fn parse_order(order: &str) -> Option<Vec<Axis>> {
        order
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ',')
            .map(|c| c.to_string().parse::<Axis>().ok())
            .collect()
    }
}

/// Position of the three axes in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Index<Axis> for Position {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl IndexMut<Axis> for Position {
    fn index_mut(&mut self, axis: Axis) -> &mut f64 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={:.3} Y={:.3} Z={:.3} mm", self.x, self.y, self.z)
    }
}
