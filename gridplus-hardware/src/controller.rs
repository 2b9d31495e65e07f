//! Grid+ controller - protocol driver for the 6-channel fan hub
//!
//! Implements the vendor's binary request/response protocol. The device sits
//! on a slow serial link and misbehaves when commands arrive back to back, so
//! every on-wire step is paced: the driver sleeps until 50 ms past the
//! transport's last access before writing or reading.

use crate::serial_driver::{SerialDriver, SerialTransport};
use gridplus_core::{GridError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Number of fan channels on the device
pub const FAN_COUNT: usize = 6;

/// Line speed of the controller
pub const BAUD_RATE: u32 = 4800;

/// Minimum gap between consecutive on-wire operations
pub const PACING_INTERVAL: Duration = Duration::from_millis(50);

/// Total window for the startup handshake
pub const HANDSHAKE_WINDOW: Duration = Duration::from_secs(5);

const CMD_PING: u8 = 0xC0;
const PING_OK: u8 = 0x21;
const CMD_GET_UNKNOWN1: u8 = 0x84;
const CMD_GET_UNKNOWN2: u8 = 0x85;
const CMD_GET_RPM: u8 = 0x8A;
const CMD_SET_VOLTAGE: u8 = 0x44;

/// All register replies open with this prefix
const REPLY_PREFIX: [u8; 3] = [0xC0, 0x00, 0x00];
const ACK_OK: u8 = 0x01;

/// Read timeout for one handshake probe
const HANDSHAKE_PROBE_TIMEOUT: Duration = Duration::from_millis(100);
/// Delay between handshake probes (capped at the window deadline)
const HANDSHAKE_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Read timeout for tachometer and diagnostic registers
const REGISTER_READ_TIMEOUT: Duration = Duration::from_millis(500);
/// Read timeout for command acknowledgements
const ACK_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Map a duty percent to the device's raw voltage code.
///
/// The device accepts code 0 (off) and codes 4..=12; this mapping bottoms
/// out at 4, so a fan is never switched off entirely.
pub fn duty_to_voltage_code(percent: u8) -> u8 {
    let scaled = (i32::from(percent) - 20) * 8 / 75;
    let code = 4 + scaled.min(8);
    code.max(4) as u8
}

/// Validated 1-based fan index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FanId(u8);

impl FanId {
    /// Create a fan index, accepting `1..=6`.
    pub fn new(index: u8) -> Result<Self> {
        if index == 0 || index as usize > FAN_COUNT {
            return Err(GridError::InvalidInput(format!(
                "fan index out of range: {index} (must be 1-{FAN_COUNT})"
            )));
        }
        Ok(FanId(index))
    }

    /// The wire value of the index
    pub fn get(self) -> u8 {
        self.0
    }

    /// All fan indices in wire order
    pub fn all() -> impl Iterator<Item = FanId> {
        (1..=FAN_COUNT as u8).map(FanId)
    }
}

impl fmt::Display for FanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fan #{}", self.0)
    }
}

/// Grid+ controller interface
///
/// Generic over the transport type, allowing real hardware (`SerialDriver`)
/// or mock transports for testing. The transport is held behind an async
/// mutex that stays locked across a whole request/response exchange, so a
/// second consumer can never interleave between pacing, write, and read.
pub struct GridController<T: SerialTransport + ?Sized = dyn SerialTransport> {
    transport: Arc<Mutex<Box<T>>>,
}

impl GridController<SerialDriver> {
    /// Open the controller on a serial device and perform the handshake.
    ///
    /// Fails if the device cannot be opened and configured, or if no ping
    /// reply arrives within [`HANDSHAKE_WINDOW`].
    pub async fn open(port_path: &str) -> Result<Self> {
        let driver = SerialDriver::open(port_path, BAUD_RATE)?;
        let controller = Self::with_transport(Box::new(driver));
        controller.handshake(HANDSHAKE_WINDOW).await?;
        Ok(controller)
    }
}

impl<T: SerialTransport + ?Sized> GridController<T> {
    /// Create a controller over a boxed transport.
    ///
    /// This is primarily useful for testing with mock transports. No
    /// handshake is performed.
    pub fn with_transport(transport: Box<T>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    /// Number of fan channels
    pub fn fan_count(&self) -> usize {
        FAN_COUNT
    }

    /// Borrowing handle for a single fan
    pub fn fan(&self, id: FanId) -> Fan<'_, T> {
        Fan {
            controller: self,
            id,
        }
    }

    /// Borrowing handles for all fans, in wire order
    pub fn fans(&self) -> impl Iterator<Item = Fan<'_, T>> {
        FanId::all().map(move |id| self.fan(id))
    }

    /// Probe the device until it answers the ping, or the window closes.
    ///
    /// Each probe writes a single `PING` byte and waits briefly for the
    /// `PING_OK` reply; an unexpected byte or a silent link is retried after
    /// a short delay. Terminates within `window` plus one trailing probe.
    pub async fn handshake(&self, window: Duration) -> Result<()> {
        let mut transport = self.transport.lock().await;
        let deadline = Instant::now() + window;

        loop {
            pace(&**transport).await;
            transport.write_all(&[CMD_PING]).await?;

            pace(&**transport).await;
            let mut reply = [0u8; 1];
            match transport.read_exact(&mut reply, HANDSHAKE_PROBE_TIMEOUT).await {
                Ok(()) if reply[0] == PING_OK => {
                    debug!("Handshake complete");
                    return Ok(());
                }
                Ok(()) => warn!("Unexpected handshake reply: {:#04x}", reply[0]),
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(GridError::Timeout(format!(
                    "no handshake reply within {window:?}"
                )));
            }
            sleep_until(deadline.min(now + HANDSHAKE_RETRY_DELAY)).await;
        }
    }

    /// Read the tachometer value of a fan, in RPM.
    pub async fn get_speed(&self, fan: FanId) -> Result<u16> {
        self.get_register(CMD_GET_RPM, fan).await
    }

    /// Read the first undocumented per-fan register. Retained for
    /// diagnostics.
    pub async fn get_unknown1(&self, fan: FanId) -> Result<u16> {
        self.get_register(CMD_GET_UNKNOWN1, fan).await
    }

    /// Read the second undocumented per-fan register. Retained for
    /// diagnostics.
    pub async fn get_unknown2(&self, fan: FanId) -> Result<u16> {
        self.get_register(CMD_GET_UNKNOWN2, fan).await
    }

    /// Set a fan's duty in percent (0-100).
    ///
    /// The percent is mapped to the device's voltage code and the single
    /// acknowledgement byte is consumed before returning.
    pub async fn set_percent(&self, fan: FanId, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(GridError::InvalidInput(format!(
                "invalid percent value: {percent}"
            )));
        }

        let raw = duty_to_voltage_code(percent);
        let frame = [CMD_SET_VOLTAGE, fan.get(), 0xC0, 0x00, 0x00, raw, 0x00];
        debug!("Setting {} to {}% (code {:#04x})", fan, percent, raw);

        let mut transport = self.transport.lock().await;

        pace(&**transport).await;
        transport.write_all(&frame).await?;

        pace(&**transport).await;
        let mut ack = [0u8; 1];
        transport.read_exact(&mut ack, ACK_READ_TIMEOUT).await?;

        if ack[0] != ACK_OK {
            return Err(GridError::Protocol(format!(
                "invalid data: ack byte {:#04x} for {fan}",
                ack[0]
            )));
        }

        Ok(())
    }

    /// Shared request/reply for the 5-byte register commands.
    async fn get_register(&self, opcode: u8, fan: FanId) -> Result<u16> {
        let mut transport = self.transport.lock().await;

        pace(&**transport).await;
        transport.write_all(&[opcode, fan.get()]).await?;

        pace(&**transport).await;
        let mut reply = [0u8; 5];
        transport
            .read_exact(&mut reply, REGISTER_READ_TIMEOUT)
            .await?;

        if reply[..3] != REPLY_PREFIX {
            return Err(GridError::Protocol(format!(
                "unexpected data: {:02X?} for {fan}",
                reply
            )));
        }

        Ok(u16::from_be_bytes([reply[3], reply[4]]))
    }
}

/// Sleep until the pacing interval past the transport's last wire access.
async fn pace<T: SerialTransport + ?Sized>(transport: &T) {
    sleep_until(transport.last_access() + PACING_INTERVAL).await;
}

/// Borrowing handle for one fan channel
///
/// Non-owning with respect to the controller; valid for the controller's
/// lifetime.
pub struct Fan<'a, T: SerialTransport + ?Sized> {
    controller: &'a GridController<T>,
    id: FanId,
}

impl<T: SerialTransport + ?Sized> Fan<'_, T> {
    /// The fan's wire index
    pub fn id(&self) -> FanId {
        self.id
    }

    /// Read the fan's tachometer value, in RPM
    pub async fn speed(&self) -> Result<u16> {
        self.controller.get_speed(self.id).await
    }

    /// Set the fan's duty in percent
    pub async fn set_percent(&self, percent: u8) -> Result<()> {
        self.controller.set_percent(self.id, percent).await
    }
}

impl<T: SerialTransport + ?Sized> fmt::Display for Fan<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
