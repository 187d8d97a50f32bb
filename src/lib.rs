// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB device core with a CDC ACM serial port.
//!
//! This crate turns a USB device peripheral that only knows about fixed-size
//! packet buffers and completion interrupts into two things application code
//! can use: a byte stream per endpoint, and a serial port that a host sees as
//! `/dev/ttyACM0` or `COMn`.
//!
//! The hard part is that three facts don't get along:
//!
//! - The hardware holds one packet per endpoint, and no more.
//! - You only find out a packet went through inside the interrupt handler.
//! - Code using a serial port wants to call `write` and `read` and have them
//!   mean something, without ever blocking inside that interrupt handler.
//!
//! So the pieces are:
//!
//! - `buffer`: a software buffer per endpoint that packets are staged
//!   through. For IN it double-buffers in software, so a flush issued while
//!   the hardware is busy is replayed when it isn't, and sends a ZLP after a
//!   full-size packet.
//! - `control`: endpoint 0 staging. Control writes are validated only after
//!   their data stage has landed, so a class driver handling one can read the
//!   payload.
//! - `config`: identity, and the configuration descriptor, whose length is
//!   measured by running every class driver's descriptor code once with
//!   nowhere to write before running it again for real.
//! - `cdc`: the ACM class driver (line coding, DTR/RTS, break).
//! - `device`: `UsbCore`, which owns all of the above plus the hardware, and
//!   reacts to interrupt events.
//! - `serial`: `CdcSerial`, the application's end of the serial port.
//!
//! The hardware is reached only through `hal::UsbHal`, and the one thing
//! shared between the interrupt and everything else is guarded by
//! `critical::IrqMutex`. With the `rp2040` feature, `rp2040` provides both
//! for the RP2040's USBCTRL block.
//!
//! There is no logger in here; messages go through the `log` facade for
//! whoever installs one.

#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod cdc;
pub mod class;
pub mod config;
pub mod control;
pub mod critical;
pub mod device;
pub mod error;
pub mod hal;
pub mod serial;
pub mod usb;

#[cfg(feature = "rp2040")]
pub mod rp2040;

/// Endpoint numbers we keep buffers for, endpoint 0 included.
pub const EP_COUNT: usize = 8;
/// Packet size, and buffer capacity, of every data endpoint.
pub const EP_SIZE: usize = 64;
/// Packet size of endpoint 0.
pub const EP0_SIZE: usize = 64;
/// Largest control transfer data stage we can stage, in either direction.
/// Also caps the configuration descriptor.
pub const CTL_BUFFER_SIZE: usize = 256;
/// How long a blocking send waits for the host before giving up.
pub const SEND_TIMEOUT_MS: u32 = 250;

pub use cdc::{CdcAcm, LineCoding};
pub use class::ClassDriver;
pub use config::DeviceConfig;
pub use control::{ControlTransfer, TransferFlags};
pub use critical::{InterruptMask, IrqMutex};
pub use device::{DeviceState, UsbCore};
pub use error::Error;
pub use hal::{EndpointSpec, TransactionHandler, UsbHal};
pub use serial::CdcSerial;
