//! In-memory [`Transport`] for tests and dry runs.
//!
//! `MockTransport` is a cheap handle: clone it, hand one copy to a
//! [`SharedTransport`](crate::transport::SharedTransport) and keep the other
//! to inspect what went over the "wire".

use crate::error::{Result, StageError};
use crate::frame::{Command, Frame};
use crate::transport::Transport;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How the mock answers a write when no reply has been queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    /// Never answer.
    Silent,
    /// Send the request frame straight back.
    Echo,
    /// Behave like a bank of controllers that remember their positions.
    Controller,
}

#[derive(Debug)]
struct MockState {
    responder: Responder,
    inbound: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    resets: usize,
    positions: HashMap<u8, u32>,
    speeds: HashMap<u8, u32>,
    open: bool,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(responder: Responder) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                responder,
                inbound: VecDeque::new(),
                replies: VecDeque::new(),
                writes: Vec::new(),
                resets: 0,
                positions: HashMap::new(),
                speeds: HashMap::new(),
                open: true,
            })),
        }
    }

    pub fn silent() -> Self {
        Self::new(Responder::Silent)
    }

    pub fn echo() -> Self {
        Self::new(Responder::Echo)
    }

    pub fn simulated() -> Self {
        Self::new(Responder::Controller)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panic inside a test must not hide the recorded traffic
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bytes delivered in answer to the next write, ahead of the responder.
    pub fn queue_reply(&self, bytes: impl Into<Vec<u8>>) {
        self.state().replies.push_back(bytes.into());
    }

    /// Bytes already sitting in the input buffer, e.g. an undrained response.
    pub fn push_stale(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes.iter().copied());
    }

    /// Every write in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.state().writes.last().cloned()
    }

    pub fn resets(&self) -> usize {
        self.state().resets
    }

    pub fn pending_input(&self) -> usize {
        self.state().inbound.len()
    }

    pub fn set_position(&self, unit_id: u8, step: u32) {
        self.state().positions.insert(unit_id, step);
    }

    pub fn position(&self, unit_id: u8) -> Option<u32> {
        self.state().positions.get(&unit_id).copied()
    }

    pub fn speed(&self, unit_id: u8) -> Option<u32> {
        self.state().speeds.get(&unit_id).copied()
    }

    pub fn is_closed(&self) -> bool {
        !self.state().open
    }
}

impl MockState {
    fn respond(&mut self, request: &[u8]) {
        if let Some(reply) = self.replies.pop_front() {
            self.inbound.extend(reply);
            return;
        }
        let Ok(frame) = Frame::try_from(request) else {
            return;
        };
        let reply = match self.responder {
            Responder::Silent => return,
            Responder::Echo => frame,
            Responder::Controller => self.simulate(frame),
        };
        self.inbound.extend(reply.to_bytes());
    }

    fn simulate(&mut self, request: Frame) -> Frame {
        let unit = request.unit_id;
        match request.command {
            Command::Home => {
                self.positions.insert(unit, 0);
                Frame::new(unit, Command::Home, 0)
            }
            Command::MoveAbsolute => {
                self.positions.insert(unit, request.data);
                Frame::new(unit, Command::MoveAbsolute, request.data)
            }
            Command::SetSpeed => {
                self.speeds.insert(unit, request.data);
                Frame::new(unit, Command::SetSpeed, request.data)
            }
            Command::GetPosition => {
                let step = self.positions.get(&unit).copied().unwrap_or(0);
                Frame::new(unit, Command::GetPosition, step)
            }
            Command::Unknown(_) => request,
        }
    }
}

impl Transport for MockTransport {
    fn reset_buffers(&mut self) -> Result<()> {
        let mut state = self.state();
        if !state.open {
            return Err(StageError::Closed);
        }
        state.inbound.clear();
        state.resets += 1;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.open {
            return Err(StageError::Closed);
        }
        state.writes.push(bytes.to_vec());
        state.respond(bytes);
        Ok(())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes> {
        {
            let mut state = self.state();
            if !state.open {
                return Err(StageError::Closed);
            }
            if state.inbound.len() >= n {
                let bytes: Vec<u8> = state.inbound.drain(..n).collect();
                return Ok(Bytes::from(bytes));
            }
        }

        // Nothing else will arrive: wait out the deadline like a real line
        std::thread::sleep(timeout);

        let mut state = self.state();
        let received = state.inbound.len().min(n);
        state.inbound.drain(..received);
        Err(StageError::Timeout {
            expected: n,
            received,
            timeout,
        })
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state();
        state.open = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }
}
