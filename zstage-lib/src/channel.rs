use crate::constants::{DEFAULT_TIMEOUT, FRAME_SIZE};
use crate::error::{Result, StageError};
use crate::frame::{Command, Frame};
use crate::transport::SharedTransport;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Calibration of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisConfig {
    pub unit_id: u8,
    /// Distance per step in millimetres, strictly positive
    pub step_size_mm: f64,
    /// Soft travel limit in steps
    pub total_steps: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub offset_mm: f64,
}

impl AxisConfig {
    pub fn new(unit_id: u8, step_size_mm: f64, total_steps: u32) -> Self {
        Self {
            unit_id,
            step_size_mm,
            total_steps,
            offset_mm: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step_size_mm.is_finite() && self.step_size_mm > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "unit {}: step size must be a positive number, got {}",
                self.unit_id, self.step_size_mm
            )));
        }
        if !self.offset_mm.is_finite() {
            return Err(StageError::InvalidConfig(format!(
                "unit {}: offset must be finite, got {}",
                self.unit_id, self.offset_mm
            )));
        }
        Ok(())
    }
}

/// Which side of the travel range a millimetre target fell outside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clamp {
    Below,
    Above,
}

/// Result of converting a millimetre target into a step count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTarget {
    pub step: u32,
    pub clamp: Option<Clamp>,
}

/// One axis on the shared line.
///
/// Every operation is a fresh request/response round trip; the channel
/// keeps no knowledge of where the stage is.
#[derive(Debug, Clone)]
pub struct StageChannel {
    unit_id: u8,
    step_size_mm: f64,
    total_steps: u32,
    offset_mm: f64,
    timeout: Duration,
    link: SharedTransport,
}

impl StageChannel {
    pub fn new(link: SharedTransport, unit_id: u8, step_size_mm: f64, total_steps: u32) -> Result<Self> {
        Self::from_config(link, &AxisConfig::new(unit_id, step_size_mm, total_steps))
    }

    pub fn from_config(link: SharedTransport, config: &AxisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            unit_id: config.unit_id,
            step_size_mm: config.step_size_mm,
            total_steps: config.total_steps,
            offset_mm: config.offset_mm,
            timeout: DEFAULT_TIMEOUT,
            link,
        })
    }

    /// Override the response deadline (2 s by default).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn step_size_mm(&self) -> f64 {
        self.step_size_mm
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn offset_mm(&self) -> f64 {
        self.offset_mm
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full travel of the stage in millimetres.
    pub fn travel_mm(&self) -> f64 {
        self.total_steps as f64 * self.step_size_mm
    }

    /// Set the calibration offset subtracted from millimetre targets.
    pub fn recalibrate(&mut self, offset_mm: f64) -> Result<()> {
        if !offset_mm.is_finite() {
            return Err(StageError::InvalidConfig(format!("offset must be finite, got {offset_mm}")));
        }
        info!(unit = self.unit_id, offset_mm, "Stage offset recalibrated");
        self.offset_mm = offset_mm;
        Ok(())
    }

    /// Convert a millimetre target into a step count inside `[0, total_steps]`.
    pub fn steps_for_mm(&self, pos_mm: f64) -> Result<StepTarget> {
        if !pos_mm.is_finite() {
            return Err(StageError::InvalidTarget(pos_mm));
        }
        let raw = ((pos_mm - self.offset_mm) / self.step_size_mm).round();
        let target = if raw < 0.0 {
            StepTarget {
                step: 0,
                clamp: Some(Clamp::Below),
            }
        } else if raw > self.total_steps as f64 {
            StepTarget {
                step: self.total_steps,
                clamp: Some(Clamp::Above),
            }
        } else {
            StepTarget {
                step: raw as u32,
                clamp: None,
            }
        };
        Ok(target)
    }

    /// Start a homing cycle and wait for the controller's answer.
    pub fn home(&self) -> Result<()> {
        info!(unit = self.unit_id, "Homing");
        self.transact(Command::Home, 0)?;
        Ok(())
    }

    /// Move to an absolute step.
    ///
    /// With `wait == false` the request is written and the call returns
    /// without reading a response.
    pub fn move_to_step(&self, step: u32, wait: bool) -> Result<()> {
        let step = if step > self.total_steps {
            warn!(
                unit = self.unit_id,
                requested = step,
                limit = self.total_steps,
                "Step target beyond travel limit, clamping"
            );
            self.total_steps
        } else {
            step
        };
        debug!(unit = self.unit_id, step, wait, "Move to step");
        if wait {
            self.transact(Command::MoveAbsolute, step)?;
        } else {
            self.send(Command::MoveAbsolute, step)?;
        }
        Ok(())
    }

    /// Move to a position in millimetres, relative to the calibration offset.
    pub fn move_to_mm(&self, pos_mm: f64, wait: bool) -> Result<()> {
        let target = self.steps_for_mm(pos_mm)?;
        match target.clamp {
            Some(Clamp::Below) => warn!(
                unit = self.unit_id,
                pos_mm,
                "Target below start of travel, clamping to 0 mm"
            ),
            Some(Clamp::Above) => warn!(
                unit = self.unit_id,
                pos_mm,
                limit_mm = self.travel_mm(),
                "Target beyond end of travel, clamping"
            ),
            None => {}
        }
        self.move_to_step(target.step, wait)
    }

    /// Current position in millimetres, derived from the raw step count.
    pub fn get_position(&self) -> Result<f64> {
        let steps = self.get_position_steps()?;
        Ok(steps as f64 * self.step_size_mm)
    }

    /// Current position as reported by the controller, in steps.
    pub fn get_position_steps(&self) -> Result<u32> {
        let reply = self.transact(Command::GetPosition, 0)?;
        debug!(unit = self.unit_id, steps = reply.data, "Position");
        Ok(reply.data)
    }

    pub fn set_speed(&self, value: u32) -> Result<()> {
        debug!(unit = self.unit_id, value, "Set speed");
        self.transact(Command::SetSpeed, value)?;
        Ok(())
    }

    /// Write one request without waiting for the response.
    fn send(&self, command: Command, data: u32) -> Result<()> {
        let request = Frame::new(self.unit_id, command, data).to_bytes();
        let mut link = self.link.lock()?;
        link.reset_buffers()?;
        debug!(bytes = hex::encode(request), "Serial Write");
        link.write(&request)
    }

    /// One full request/response exchange. The line stays locked from the
    /// buffer reset through the identity check.
    fn transact(&self, command: Command, data: u32) -> Result<Frame> {
        let request = Frame::new(self.unit_id, command, data).to_bytes();
        let mut link = self.link.lock()?;

        link.reset_buffers()?;
        debug!(bytes = hex::encode(request), "Serial Write");
        link.write(&request)?;

        let response = link.read_exact(FRAME_SIZE, self.timeout).map_err(|e| {
            if let StageError::Timeout { received, .. } = &e {
                warn!(unit = self.unit_id, %command, received, "No complete response");
            }
            e
        })?;
        debug!(bytes = hex::encode(&response), "Serial Read");

        let raw: [u8; FRAME_SIZE] = response.as_ref().try_into().map_err(|_| StageError::InvalidFrame {
            expected: FRAME_SIZE,
            actual: response.len(),
        })?;
        let reply = Frame::from_bytes(&raw);
        if reply.unit_id != self.unit_id {
            warn!(
                expected = self.unit_id,
                received = reply.unit_id,
                %command,
                "Response from another unit"
            );
            return Err(StageError::IdentityMismatch {
                expected: self.unit_id,
                received: reply.unit_id,
                raw,
            });
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{LSM_STEP_SIZE_MM, LSM100A_TOTAL_STEPS};
    use crate::mock::MockTransport;

    fn channel() -> StageChannel {
        let link = SharedTransport::new(MockTransport::echo());
        StageChannel::new(link, 1, LSM_STEP_SIZE_MM, LSM100A_TOTAL_STEPS).unwrap()
    }

    #[test]
    fn test_steps_for_mm_rounds_to_nearest() {
        let ch = channel();
        assert_eq!(ch.steps_for_mm(50.0).unwrap().step, 1_049_869);
        assert_eq!(ch.steps_for_mm(101.6).unwrap().step, 2_133_333);
        assert_eq!(ch.steps_for_mm(0.0).unwrap(), StepTarget { step: 0, clamp: None });
    }

    #[test]
    fn test_steps_for_mm_is_pure() {
        let ch = channel();
        let first = ch.steps_for_mm(37.25).unwrap();
        for _ in 0..10 {
            assert_eq!(ch.steps_for_mm(37.25).unwrap(), first);
        }
    }

    #[test]
    fn test_steps_for_mm_clamps() {
        let ch = channel();
        assert_eq!(
            ch.steps_for_mm(250.0).unwrap(),
            StepTarget {
                step: LSM100A_TOTAL_STEPS,
                clamp: Some(Clamp::Above)
            }
        );
        assert_eq!(
            ch.steps_for_mm(-0.5).unwrap(),
            StepTarget {
                step: 0,
                clamp: Some(Clamp::Below)
            }
        );
    }

    #[test]
    fn test_offset_shifts_targets() {
        let mut ch = channel();
        ch.recalibrate(10.0).unwrap();
        assert_eq!(ch.steps_for_mm(10.0).unwrap().step, 0);
        assert_eq!(ch.steps_for_mm(5.0).unwrap().clamp, Some(Clamp::Below));
        assert_eq!(ch.steps_for_mm(60.0).unwrap().step, 1_049_869);
        assert!(ch.recalibrate(f64::NAN).is_err());
        assert_eq!(ch.offset_mm(), 10.0);
    }

    #[test]
    fn test_non_finite_target_is_rejected() {
        let ch = channel();
        assert!(matches!(ch.steps_for_mm(f64::NAN), Err(StageError::InvalidTarget(_))));
        assert!(matches!(
            ch.move_to_mm(f64::INFINITY, true),
            Err(StageError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_invalid_step_size_is_rejected() {
        let link = SharedTransport::new(MockTransport::echo());
        for step in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                StageChannel::new(link.clone(), 1, step, 10),
                Err(StageError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_travel_mm() {
        let ch = channel();
        assert!((ch.travel_mm() - 101.6).abs() < 1e-4);
    }
}
