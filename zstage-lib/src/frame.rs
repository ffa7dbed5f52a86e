use crate::constants::FRAME_SIZE;
use crate::error::StageError;
use bytes::Bytes;
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use strum_macros::Display;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Command byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Command {
    Home = 1,
    MoveAbsolute = 20,
    SetSpeed = 36,
    GetPosition = 60,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Wire layout: unit id, command id, little-endian u32 data.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameRaw {
    pub unit_id: u8,
    pub command_id: u8,
    pub data: U32,
}

/// A decoded 6-byte frame, used in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub unit_id: u8,
    pub command: Command,
    pub data: u32,
}

impl Frame {
    pub fn new(unit_id: u8, command: Command, data: u32) -> Self {
        Self { unit_id, command, data }
    }

    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let raw = FrameRaw::from(*self);
        zerocopy::transmute!(raw)
    }

    pub fn from_bytes(bytes: &[u8; FRAME_SIZE]) -> Self {
        let raw: FrameRaw = zerocopy::transmute!(*bytes);
        Frame::from(raw)
    }
}

impl From<FrameRaw> for Frame {
    fn from(raw: FrameRaw) -> Self {
        Self {
            unit_id: raw.unit_id,
            command: Command::from_primitive(raw.command_id),
            data: raw.data.get(),
        }
    }
}

impl From<Frame> for FrameRaw {
    fn from(frame: Frame) -> Self {
        Self {
            unit_id: frame.unit_id,
            command_id: frame.command.into(),
            data: U32::new(frame.data),
        }
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = StageError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw = FrameRaw::read_from_bytes(bytes).map_err(|_| StageError::InvalidFrame {
            expected: FRAME_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Frame::from(raw))
    }
}

impl TryFrom<Bytes> for Frame {
    type Error = StageError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        Frame::try_from(bytes.as_ref())
    }
}

impl From<Frame> for Bytes {
    fn from(frame: Frame) -> Self {
        Bytes::copy_from_slice(&frame.to_bytes())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unit {} {} data {} [{}]",
            self.unit_id,
            self.command,
            self.data,
            hex::encode(self.to_bytes())
        )
    }
}
