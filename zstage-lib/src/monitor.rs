//! Background position polling.
//!
//! The monitor runs on its own thread so the blocking serial exchanges never
//! stall an async caller. Each axis read takes the line lock on its own, so
//! commands from other call sites can interleave between reads.

use crate::axis::{Axis, Position};
use crate::channel::StageChannel;
use crate::error::ErrorKind;
use crate::session::StageSession;
use chrono::{DateTime, Utc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const EVENT_QUEUE_DEPTH: usize = 64;
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PositionSample {
    pub timestamp: DateTime<Utc>,
    /// Time since the monitor started
    pub elapsed: Duration,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MonitorEvent {
    Sample(PositionSample),
    /// One axis could not be read; the rest of that batch is skipped.
    ReadFailed {
        axis: Axis,
        kind: ErrorKind,
        message: String,
    },
}

pub struct PositionMonitor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PositionMonitor {
    /// Start polling `channels` every `interval` until `cancel` fires.
    pub fn spawn(
        channels: Vec<(Axis, StageChannel)>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("position-monitor".to_string())
            .spawn(move || poll_loop(channels, interval, token, tx))
            .map_err(|e| warn!("Failed to start position monitor: {e}"))
            .ok();
        (Self { cancel, handle }, rx)
    }

    /// Monitor every axis configured in `session`.
    pub fn for_session(
        session: &StageSession,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let channels = session
            .axes()
            .filter_map(|axis| session.channel(axis).ok().map(|c| (axis, c.clone())))
            .collect();
        Self::spawn(channels, interval, cancel)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel polling and wait for the worker to exit.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Position monitor thread panicked");
            }
        }
    }
}

impl Drop for PositionMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn poll_loop(
    channels: Vec<(Axis, StageChannel)>,
    interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<MonitorEvent>,
) {
    let started = Instant::now();
    debug!(axes = channels.len(), ?interval, "Position monitor started");

    'poll: while !cancel.is_cancelled() {
        let mut position = Position::default();
        let mut complete = true;

        for (axis, channel) in &channels {
            if cancel.is_cancelled() {
                break 'poll;
            }
            match channel.get_position() {
                Ok(mm) => position[*axis] = mm,
                Err(e) => {
                    warn!(%axis, "Position read failed: {e}");
                    let kind = e.kind();
                    let event = MonitorEvent::ReadFailed {
                        axis: *axis,
                        kind,
                        message: e.to_string(),
                    };
                    if !publish(&tx, event) || kind == ErrorKind::Connection {
                        break 'poll;
                    }
                    complete = false;
                    break;
                }
            }
        }

        if complete {
            let sample = PositionSample {
                timestamp: Utc::now(),
                elapsed: started.elapsed(),
                position,
            };
            if !publish(&tx, MonitorEvent::Sample(sample)) {
                break;
            }
        }

        let resume_at = Instant::now() + interval;
        loop {
            let now = Instant::now();
            if now >= resume_at {
                break;
            }
            if cancel.is_cancelled() {
                break 'poll;
            }
            thread::sleep((resume_at - now).min(CANCEL_CHECK_INTERVAL));
        }
    }
    debug!("Position monitor stopped");
}

/// Returns false once the receiver is gone.
fn publish(tx: &mpsc::Sender<MonitorEvent>, event: MonitorEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("Monitor queue full, dropping event");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::session::SessionConfig;

    #[test]
    fn test_monitor_streams_samples_until_cancelled() {
        let mock = MockTransport::simulated();
        mock.set_position(1, 1000);
        mock.set_position(3, 2000);
        let session = StageSession::with_transport(mock.clone(), &SessionConfig::default()).unwrap();

        let cancel = CancellationToken::new();
        let (monitor, mut rx) = PositionMonitor::for_session(&session, Duration::from_millis(5), cancel.clone());

        let first = rx.blocking_recv().expect("monitor should emit");
        let MonitorEvent::Sample(sample) = first else {
            panic!("expected a sample, got {first:?}");
        };
        assert!((sample.position.x - 1000.0 * 0.000047625).abs() < 1e-12);
        assert_eq!(sample.position.y, 0.0);
        assert!((sample.position.z - 2000.0 * 0.000047625).abs() < 1e-12);

        monitor.stop();
        assert!(cancel.is_cancelled());
        // Drain whatever was queued; the sender is gone once the thread exits
        while rx.blocking_recv().is_some() {}
    }

    #[test]
    fn test_monitor_reports_failed_reads() {
        let mock = MockTransport::silent();
        let session = StageSession::with_transport(
            mock,
            &SessionConfig {
                timeout: Duration::from_millis(5),
                ..SessionConfig::default()
            },
        )
        .unwrap();

        let (monitor, mut rx) =
            PositionMonitor::for_session(&session, Duration::from_millis(5), CancellationToken::new());
        match rx.blocking_recv() {
            Some(MonitorEvent::ReadFailed { axis, kind, .. }) => {
                assert_eq!(axis, Axis::X);
                assert_eq!(kind, ErrorKind::Timeout);
            }
            other => panic!("expected a failed read, got {other:?}"),
        }
        monitor.stop();
    }

    #[test]
    fn test_monitor_stops_on_closed_line() {
        let mock = MockTransport::simulated();
        let session = StageSession::with_transport(mock, &SessionConfig::default()).unwrap();
        session.close().unwrap();

        let (monitor, mut rx) =
            PositionMonitor::for_session(&session, Duration::from_millis(5), CancellationToken::new());
        match rx.blocking_recv() {
            Some(MonitorEvent::ReadFailed { kind, .. }) => assert_eq!(kind, ErrorKind::Connection),
            other => panic!("expected a connection failure, got {other:?}"),
        }
        assert!(rx.blocking_recv().is_none());
        monitor.stop();
    }
}
