use crate::constants::{BAUD_RATE, DEFAULT_TIMEOUT, READ_GRANULARITY};
use crate::error::{Result, StageError};
use bytes::Bytes;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Byte-level primitives over the shared serial line.
///
/// A transport never interprets frame contents. It is not safe to drive
/// one from two threads at once; share it through [`SharedTransport`].
pub trait Transport: Send {
    /// Discard unread input and unflushed output.
    fn reset_buffers(&mut self) -> Result<()>;

    /// Send every byte of `bytes`, blocking until the driver accepts them.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Block until exactly `n` bytes have arrived or `timeout` elapses.
    ///
    /// On timeout the partially received bytes are dropped and
    /// [`StageError::Timeout`] is returned.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes>;

    /// Close the connection. Any later call fails with [`StageError::Closed`].
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// A transport shared by every axis on the line.
///
/// The inner lock is held for one complete request/response cycle, which
/// keeps the half-duplex protocol to a single outstanding request.
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl SharedTransport {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    /// Take exclusive use of the line.
    pub fn lock(&self) -> Result<MutexGuard<'_, Box<dyn Transport>>> {
        self.inner.lock().map_err(|_| StageError::LinkPoisoned)
    }

    pub fn close(&self) -> Result<()> {
        self.lock()?.close()
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|t| t.is_open()).unwrap_or(false)
    }
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport").field("open", &self.is_open()).finish()
    }
}

/// Information about a serial port found on the host.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// List serial ports available on this machine.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

/// Transport over an OS serial port, 8N1 without flow control.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open `path` at the controllers' default 9600 baud.
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_baud(path, BAUD_RATE)
    }

    pub fn open_with_baud(path: &str, baud_rate: u32) -> Result<Self> {
        info!(port = path, baud_rate, "Opening serial port");
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;
        Self::from_port(port, path)
    }

    /// Wrap a port that is already open and configured, e.g. one end of a pty pair.
    pub fn from_port(port: Box<dyn SerialPort>, name: impl Into<String>) -> Result<Self> {
        let mut transport = Self {
            port: Some(port),
            name: name.into(),
        };
        transport.reset_buffers()?;
        Ok(transport)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes currently waiting in the driver's input buffer.
    pub fn bytes_available(&self) -> Result<u32> {
        Ok(self.port()?.bytes_to_read()?)
    }

    fn port(&self) -> Result<&dyn SerialPort> {
        self.port.as_deref().ok_or(StageError::Closed)
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(StageError::Closed)
    }
}

impl Transport for SerialTransport {
    fn reset_buffers(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            let now = Instant::now();
            if now >= deadline {
                debug!(received = filled, expected = n, "Serial read deadline passed");
                return Err(StageError::Timeout {
                    expected: n,
                    received: filled,
                    timeout,
                });
            }
            port.set_timeout((deadline - now).min(READ_GRANULARITY))?;
            match port.read(&mut buf[filled..]) {
                Ok(count) => filled += count,
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Bytes::from(buf))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(port) = self.port.take() {
            drop(port);
            info!(port = %self.name, "Serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
