//! A CAN API driver for serial-line CAN adapters speaking the Lawicel
//! SLCAN ASCII protocol (CANUSB, CANable and compatible USB gateways).
//!
//! Applications open a channel on a TTY device, program a bit-rate, start
//! the controller and exchange classic CAN 2.0 frames; the driver hides
//! the bytes on the wire. Received frames are collected by a background
//! reader thread into a per-channel queue and handed out by
//! [`read_message`](CanApi::read_message) with blocking semantics.
//!
//! ## Usage
//!
//! ```no_run
//! use serialcan::bittiming::INDEX_250K;
//! use serialcan::{BitrateSetting, CanApi, DeviceParams, OpMode, SerialCan};
//!
//! fn main() -> Result<(), serialcan::CanError> {
//!     let mut can = SerialCan::new();
//!
//!     can.initialize_channel(&DeviceParams::new("/dev/ttyUSB0"), OpMode::DEFAULT)?;
//!     can.start_controller(&BitrateSetting::Index(INDEX_250K))?;
//!
//!     loop {
//!         match can.read_message(serialcan::TIMEOUT_INFINITE) {
//!             Ok(frame) => println!("{:?}", frame),
//!             Err(e) => eprintln!("{:?}", e),
//!         }
//!     }
//! }
//! ```
//!
//! ## Protocol dialects
//!
//! Lawicel firmware acknowledges every command with CR (BEL on failure);
//! CANable firmware does not. The dialect is a runtime flag
//! ([`DeviceParams::ack`], or [`SlcanPort::set_ack`] on the engine
//! level). Commands whose response does not exist in the CANable dialect
//! fail with a protocol error unless the `canable-stub` feature
//! substitutes zeroed values.

pub use embedded_can::{ExtendedId, Id, StandardId};

pub mod bittiming;
mod buffer;
mod channel;
mod command;
mod driver;
mod error;
mod frame;
mod parser;
mod queue;
mod serial;
mod slcan;
mod timer;

pub use bittiming::{Bitrate, BitrateError, BitrateSetting, BusSpeed};
pub use channel::*;
pub use command::{Command, CommandKind};
pub use driver::{CanApi, SerialCan};
pub use error::CanError;
pub use frame::{CanFrame, MAX_DLC};
pub use parser::{MessageKind, MessageParseError};
pub use serial::{SerialAttr, SerialError};
pub use slcan::{SlcanError, SlcanPort, StatusFlags};
pub use timer::Timestamp;

/// Wait forever (queue reads and response waits).
pub const TIMEOUT_INFINITE: u16 = 65535;
