//! gridplus-hardware
//!
//! Hardware abstraction crate for the Grid+ fan controller: the low-level
//! serial transport and the protocol driver sitting on top of it. The daemon
//! crate consumes this to actuate fans and read tachometer values.
//
//! Public API:
//! - `controller::GridController` — protocol driver and fan-handle collection
//! - `controller::FanId` — validated 1-based fan index
//! - `serial_driver::SerialDriver` — tokio-serial transport implementation
//! - `serial_driver::SerialTransport` — transport trait (mockable for tests)

pub mod controller;
pub mod serial_driver;

pub use controller::{Fan, FanId, GridController, FAN_COUNT};
pub use serial_driver::{SerialDriver, SerialTransport};
