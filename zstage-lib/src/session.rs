use crate::axis::{Axis, Position};
use crate::channel::{AxisConfig, StageChannel};
use crate::constants::{BAUD_RATE, DEFAULT_TIMEOUT, LSM_STEP_SIZE_MM, LSM050A_TOTAL_STEPS, LSM100A_TOTAL_STEPS};
use crate::error::{Result, StageError};
use crate::sensor::{CalibrationSample, ForceSensor};
use crate::transport::{SerialTransport, SharedTransport, Transport};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything needed to open a session on one serial line.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub axes: BTreeMap<Axis, AxisConfig>,
}

impl Default for SessionConfig {
    /// The three-axis bench: LSM100A on X and Y, LSM050A on Z.
    fn default() -> Self {
        let axes = BTreeMap::from([
            (
                Axis::X,
                AxisConfig::new(Axis::X.default_unit_id(), LSM_STEP_SIZE_MM, LSM100A_TOTAL_STEPS),
            ),
            (
                Axis::Y,
                AxisConfig::new(Axis::Y.default_unit_id(), LSM_STEP_SIZE_MM, LSM100A_TOTAL_STEPS),
            ),
            (
                Axis::Z,
                AxisConfig::new(Axis::Z.default_unit_id(), LSM_STEP_SIZE_MM, LSM050A_TOTAL_STEPS),
            ),
        ]);
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            axes,
        }
    }
}

impl SessionConfig {
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }
}

/// One open serial line and the axes multiplexed on it.
#[derive(Debug)]
pub struct StageSession {
    link: SharedTransport,
    channels: BTreeMap<Axis, StageChannel>,
}

impl StageSession {
    /// Open the serial port named in `config` and build a channel per axis.
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let transport = SerialTransport::open_with_baud(&config.port, config.baud_rate)?;
        let session = Self::with_transport(transport, config)?;
        info!(port = %config.port, axes = session.channels.len(), "Stage session open");
        Ok(session)
    }

    pub fn with_transport<T: Transport + 'static>(transport: T, config: &SessionConfig) -> Result<Self> {
        let link = SharedTransport::new(transport);
        let mut channels = BTreeMap::new();
        for (axis, axis_config) in &config.axes {
            let channel = StageChannel::from_config(link.clone(), axis_config)?.with_timeout(config.timeout);
            channels.insert(*axis, channel);
        }
        Ok(Self { link, channels })
    }

    pub fn link(&self) -> &SharedTransport {
        &self.link
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.channels.keys().copied()
    }

    pub fn channel(&self, axis: Axis) -> Result<&StageChannel> {
        self.channels.get(&axis).ok_or(StageError::UnknownAxis(axis))
    }

    pub fn channel_mut(&mut self, axis: Axis) -> Result<&mut StageChannel> {
        self.channels.get_mut(&axis).ok_or(StageError::UnknownAxis(axis))
    }

    /// Query every configured axis. Axes missing from the session read as 0.
    pub fn positions(&self) -> Result<Position> {
        let mut position = Position::default();
        for (axis, channel) in &self.channels {
            position[*axis] = channel.get_position()?;
        }
        Ok(position)
    }

    /// Move one axis at a time in `order`, waiting on each when `wait` is set.
    pub fn move_to_mm(&self, target: Position, order: &[Axis], wait: bool) -> Result<()> {
        for axis in order {
            self.channel(*axis)?.move_to_mm(target[*axis], wait)?;
        }
        Ok(())
    }

    pub fn home_all(&self, order: &[Axis]) -> Result<()> {
        for axis in order {
            self.channel(*axis)?.home()?;
        }
        Ok(())
    }

    /// Pair a fresh position with one reading from `sensor`.
    pub fn sample<S: ForceSensor + ?Sized>(&self, sensor: &mut S) -> Result<CalibrationSample> {
        let position = self.positions()?;
        let reading = sensor.read_frame();
        Ok(CalibrationSample { position, reading })
    }

    /// Close the line. Channels handed out earlier fail with `Closed` afterwards.
    pub fn close(&self) -> Result<()> {
        let mut link = self.link.lock()?;
        if !link.is_open() {
            warn!("Stage session already closed");
            return Ok(());
        }
        link.close()?;
        info!("Stage session closed");
        Ok(())
    }
}
