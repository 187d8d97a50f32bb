// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seams between this crate and the rest of the firmware.
//!
//! - `UsbHal` is what the core needs from the peripheral: copy packets in and
//!   out of packet memory, arm and stall endpoints, and tell the time.
//! - `TransactionHandler` is one slot in the chain of interrupt handlers.
//!   `UsbCore` implements it, does its own work for each event, and then
//!   passes the event on to the handler it wraps.
//! - `EndpointSpec` is how a class driver declares the endpoints it uses.

use crate::usb::{UsbDir, UsbTransferType};

/// Register-level access to a USB device peripheral.
///
/// Every call is made either from the USB interrupt or from foreground code
/// that holds the USB critical section, so implementations don't need any
/// locking of their own.
pub trait UsbHal {
    /// Enables a non-control endpoint with the given type and packet size.
    fn ep_setup(&mut self, ep: &EndpointSpec);

    /// Copies `data` into packet memory for IN endpoint `ep` and hands it to
    /// the host on the next IN token. `data` may be empty (a ZLP). The caller
    /// guarantees that no earlier transmission on `ep` is still outstanding.
    fn ep_write(&mut self, ep: u8, data: &[u8]);

    /// Copies the packet most recently received on OUT endpoint `ep` into
    /// `buf` and returns its length.
    fn ep_read(&mut self, ep: u8, buf: &mut [u8]) -> usize;

    /// Arms OUT endpoint `ep` to accept one packet of up to `max_len` bytes.
    fn ep_rx_enable(&mut self, ep: u8, max_len: usize);

    /// Answers tokens on endpoint address `ep_addr` with STALL. For endpoint
    /// 0 both directions stall, and the stall ends when the next SETUP
    /// arrives.
    fn ep_stall(&mut self, ep_addr: u8);

    /// Lifts a halt set by `ep_stall` and resets the data toggle.
    fn ep_clear_stall(&mut self, _ep_addr: u8) {}

    /// Copies the SETUP packet into `buf`, returning how many bytes the
    /// hardware reports having received.
    fn read_setup(&mut self, buf: &mut [u8; 8]) -> usize;

    /// Switches to a new bus address.
    fn set_address(&mut self, address: u8);

    /// Free-running millisecond counter. Wraps.
    fn millis(&self) -> u32;

    /// Presents the device on the bus (pull-up on).
    fn connect(&mut self) {}

    fn disconnect(&mut self) {}
}

/// Completion events from the peripheral's interrupt.
///
/// Every method defaults to doing nothing, and `()` is the end of a chain.
/// A handler that wraps another one calls through to it after doing its own
/// work, the way a replaced entry in a vector table calls the entry it
/// replaced.
pub trait TransactionHandler {
    /// A SETUP packet arrived on control endpoint `ep`.
    fn transaction_setup(&mut self, _ep: u8) {}
    /// An IN packet on `ep` was collected by the host.
    fn transaction_in(&mut self, _ep: u8) {}
    /// An OUT packet on `ep` landed in packet memory.
    fn transaction_out(&mut self, _ep: u8) {}
    /// The peripheral flagged a transaction it couldn't classify.
    fn transaction_unknown(&mut self, _ep: u8) {}
    fn bus_reset(&mut self) {}
    fn suspend(&mut self) {}
    fn resume(&mut self) {}
}

impl TransactionHandler for () {}

impl<T: TransactionHandler + ?Sized> TransactionHandler for &mut T {
    fn transaction_setup(&mut self, ep: u8) {
        (**self).transaction_setup(ep)
    }
    fn transaction_in(&mut self, ep: u8) {
        (**self).transaction_in(ep)
    }
    fn transaction_out(&mut self, ep: u8) {
        (**self).transaction_out(ep)
    }
    fn transaction_unknown(&mut self, ep: u8) {
        (**self).transaction_unknown(ep)
    }
    fn bus_reset(&mut self) {
        (**self).bus_reset()
    }
    fn suspend(&mut self) {
        (**self).suspend()
    }
    fn resume(&mut self) {
        (**self).resume()
    }
}

/// A non-control endpoint a class driver wants configured.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Endpoint address, direction bit included.
    pub address: u8,
    pub transfer_type: UsbTransferType,
    pub max_packet_size: u16,
}

impl EndpointSpec {
    pub const fn new(address: u8, transfer_type: UsbTransferType, max_packet_size: u16) -> Self {
        Self {
            address,
            transfer_type,
            max_packet_size,
        }
    }

    pub const fn number(&self) -> u8 {
        crate::usb::endpoint_number(self.address)
    }

    pub const fn dir(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.address)
    }
}
