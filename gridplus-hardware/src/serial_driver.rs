//! Serial driver for low-level hardware communication
//!
//! Provides async serial I/O with the Grid+ controller. The device speaks a
//! binary protocol over a slow 4800-baud link, so the transport deals in raw
//! byte buffers with per-read timeouts and tracks the instant of the last
//! wire access for the driver's pacing logic.

use async_trait::async_trait;
use gridplus_core::{GridError, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error};

/// Trait for serial transport abstraction
///
/// This trait enables testing of `GridController` without real hardware
/// by allowing mock implementations.
#[async_trait]
pub trait SerialTransport: Send {
    /// Write the full buffer and flush it onto the wire
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `buf.len()` bytes, looping single reads until the buffer
    /// is filled. The timeout applies to each inner read; callers must not
    /// assume a tighter total deadline.
    async fn read_exact(&mut self, buf: &mut [u8], read_timeout: Duration) -> Result<()>;

    /// Instant of the most recent read or write attempt
    fn last_access(&self) -> Instant;
}

/// Serial transport over a tty-like character device
pub struct SerialDriver {
    port: SerialStream,
    port_path: String,
    last_access: Instant,
}

impl SerialDriver {
    /// Open a serial device in 8N1 framing at the given baud rate.
    ///
    /// # Arguments
    /// * `port_path` - Path to the serial device (e.g., "/dev/GridPlus0")
    /// * `baud_rate` - Line speed in baud
    pub fn open(port_path: &str, baud_rate: u32) -> Result<Self> {
        debug!("Opening serial port: {}", port_path);

        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", port_path, e);
                GridError::Serial(format!("Failed to open serial port {port_path}: {e}"))
            })?;

        debug!("Serial port opened successfully");

        Ok(Self {
            port,
            port_path: port_path.to_string(),
            last_access: Instant::now(),
        })
    }

    /// Path the device was opened from
    pub fn port_path(&self) -> &str {
        &self.port_path
    }
}

#[async_trait]
impl SerialTransport for SerialDriver {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let result = async {
            self.port.write_all(data).await.map_err(|e| {
                error!("Write failed: {}", e);
                GridError::Serial(format!("Write failed: {e}"))
            })?;

            // Flush to ensure data is sent
            self.port
                .flush()
                .await
                .map_err(|e| GridError::Serial(format!("Flush failed: {e}")))
        }
        .await;

        self.last_access = Instant::now();
        result
    }

    async fn read_exact(&mut self, buf: &mut [u8], read_timeout: Duration) -> Result<()> {
        let result = async {
            let mut filled = 0;
            while filled < buf.len() {
                let n = timeout(read_timeout, self.port.read(&mut buf[filled..]))
                    .await
                    .map_err(|_| {
                        GridError::Timeout(format!("no data within {read_timeout:?}"))
                    })?
                    .map_err(|e| {
                        error!("Read error: {}", e);
                        GridError::Serial(format!("Read error: {e}"))
                    })?;

                if n == 0 {
                    // EOF indicates device disconnection (USB unplugged, power loss)
                    return Err(GridError::Serial(
                        "Serial port returned EOF - device may have been unplugged".to_string(),
                    ));
                }

                filled += n;
            }
            Ok(())
        }
        .await;

        self.last_access = Instant::now();
        result
    }

    fn last_access(&self) -> Instant {
        self.last_access
    }
}
