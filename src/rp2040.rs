// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `UsbHal` for the RP2040's USBCTRL block, and the interrupt glue.
//!
//! Register access goes straight through `rp2040_pac`, the same way you'd do
//! it by hand from the datasheet. A few facts about the peripheral that the
//! code below leans on:
//!
//! - Packet buffers live in the 4 kiB USB DPRAM at `0x5010_0000`. The first
//!   `0x100` bytes are the SETUP packet and the control registers; EP0's
//!   buffer is fixed at `0x100` and shared by both directions; we place data
//!   endpoints from `0x180` up, one 64-byte slot per endpoint and direction.
//! - Each endpoint direction has a buffer control register. The array is
//!   ordered EP0 IN, EP0 OUT, EP1 IN, EP1 OUT, ..., so the index is
//!   `ep * 2 + (1 if OUT)`. Bit `i` of `BUFF_STATUS` refers to the same
//!   index.
//! - Endpoint control registers exist only for EP1 and up, so their index is
//!   `(ep - 1) * 2 + (1 if OUT)`.
//! - The hardware doesn't track DATA0/DATA1 toggles for us; we do, one bit
//!   per buffer control index.
//!
//! A note on `unsafe`: most of it is `rp2040_pac` marking field writes as
//! unsafe when they aren't. The DPRAM copies are actually unsafe and say so.

use cortex_m::peripheral::NVIC;
use rp2040_pac::Interrupt;

use crate::class::ClassDriver;
use crate::critical::InterruptMask;
use crate::device::UsbCore;
use crate::hal::{EndpointSpec, TransactionHandler, UsbHal};
use crate::usb::{endpoint_number, UsbDir};

/// Start of EP0's shared buffer in DPRAM.
const EP0_BUFFER_OFFSET: usize = 0x100;
/// Start of the data endpoint buffers in DPRAM.
const DATA_BUFFER_OFFSET: usize = 0x180;
/// Size of every buffer we hand the hardware.
const BUFFER_SIZE: usize = 64;

fn buffer_control_index(ep: u8, dir: UsbDir) -> usize {
    usize::from(ep) * 2 + usize::from(dir == UsbDir::Out)
}

fn endpoint_control_index(ep: u8, dir: UsbDir) -> usize {
    (usize::from(ep) - 1) * 2 + usize::from(dir == UsbDir::Out)
}

fn buffer_offset(ep: u8, dir: UsbDir) -> usize {
    if ep == 0 {
        EP0_BUFFER_OFFSET
    } else {
        DATA_BUFFER_OFFSET + endpoint_control_index(ep, dir) * BUFFER_SIZE
    }
}

pub struct Rp2040Usb {
    regs: rp2040_pac::USBCTRL_REGS,
    dpram: rp2040_pac::USBCTRL_DPRAM,
    timer: rp2040_pac::TIMER,
    /// Bit `i` set means buffer control `i` sends or expects DATA1 next.
    next_pid_1: u32,
}

impl Rp2040Usb {
    /// Brings the controller out of reset in device mode, with the pull-up
    /// still off. `clk_usb` must already be running at 48 MHz, and the timer
    /// counting microseconds.
    pub fn new(
        regs: rp2040_pac::USBCTRL_REGS,
        dpram: rp2040_pac::USBCTRL_DPRAM,
        timer: rp2040_pac::TIMER,
        resets: &rp2040_pac::RESETS,
    ) -> Self {
        resets.reset.modify(|_, w| w.usbctrl().set_bit());
        resets.reset.modify(|_, w| w.usbctrl().clear_bit());
        while !resets.reset_done.read().usbctrl().bit() {}

        // Clear the control portion of DPRAM. The datasheet is vague on
        // whether this is needed.
        dpram.setup_packet_low.write(|w| unsafe { w.bits(0) });
        dpram.setup_packet_high.write(|w| unsafe { w.bits(0) });
        for epc in &dpram.ep_control {
            epc.write(|w| unsafe { w.bits(0) });
        }
        for epb in &dpram.ep_buffer_control {
            epb.write(|w| unsafe { w.bits(0) });
        }

        // Onboard PHY. `softcon` is undocumented but the SDK sets it.
        regs.usb_muxing.write(|w| w.to_phy().set_bit().softcon().set_bit());
        // Not every board wires up VBUS detect, so pretend it's there.
        regs.usb_pwr.write(|w| w.vbus_detect().set_bit().vbus_detect_override_en().set_bit());
        regs.main_ctrl.write(|w| w.controller_en().set_bit().host_ndevice().clear_bit());
        // Flag EP0 in BUFF_STATUS for every buffer, not every other one.
        regs.sie_ctrl.write(|w| w.ep0_int_1buf().set_bit());
        regs.inte.write(|w| {
            w.buff_status()
                .set_bit()
                .bus_reset()
                .set_bit()
                .setup_req()
                .set_bit()
                .dev_suspend()
                .set_bit()
                .dev_resume_from_host()
                .set_bit()
        });

        Self {
            regs,
            dpram,
            timer,
            next_pid_1: 0,
        }
    }

    fn buffer_ptr(&self, ep: u8, dir: UsbDir) -> *mut u8 {
        let base = rp2040_pac::USBCTRL_DPRAM::ptr() as *mut u8;
        // Safety: the offset stays inside the 4 kiB DPRAM for ep < 16.
        unsafe { base.add(buffer_offset(ep, dir)) }
    }

    /// Returns the PID to use for buffer control `bc` and flips it.
    fn take_pid(&mut self, bc: usize) -> bool {
        let bit = 1 << bc;
        let np = self.next_pid_1 & bit != 0;
        self.next_pid_1 ^= bit;
        np
    }

    fn set_pid(&mut self, bc: usize, data1: bool) {
        if data1 {
            self.next_pid_1 |= 1 << bc;
        } else {
            self.next_pid_1 &= !(1 << bc);
        }
    }
}

impl UsbHal for Rp2040Usb {
    fn ep_setup(&mut self, ep: &EndpointSpec) {
        let num = ep.number();
        if num == 0 {
            return;
        }
        let dir = ep.dir();
        let offset = buffer_offset(num, dir) as u16;
        self.dpram.ep_control[endpoint_control_index(num, dir)].write(|w| unsafe {
            w.enable()
                .set_bit()
                .interrupt_per_buff()
                .set_bit()
                .endpoint_type()
                .bits(ep.transfer_type as u8)
                .buffer_address()
                .bits(offset)
        });
        // A freshly configured endpoint starts at DATA0.
        self.set_pid(buffer_control_index(num, dir), false);
    }

    fn ep_write(&mut self, ep: u8, data: &[u8]) {
        let len = data.len().min(BUFFER_SIZE);
        // Safety: the hardware isn't using this buffer, since nothing is
        // outstanding on the endpoint, and `len` fits in it.
        unsafe {
            self.buffer_ptr(ep, UsbDir::In)
                .copy_from_nonoverlapping(data.as_ptr(), len);
        }
        let bc = buffer_control_index(ep, UsbDir::In);
        let np = self.take_pid(bc);
        self.dpram.ep_buffer_control[bc].write(|w| unsafe {
            w.pid_0()
                .bit(np)
                .full_0()
                .set_bit()
                .available_0()
                .set_bit()
                .length_0()
                .bits(len as u16)
        });
    }

    fn ep_read(&mut self, ep: u8, buf: &mut [u8]) -> usize {
        let bc = self.dpram.ep_buffer_control[buffer_control_index(ep, UsbDir::Out)].read();
        let len = usize::from(bc.length_0().bits()).min(buf.len()).min(BUFFER_SIZE);
        // Safety: we only get here from the OUT completion, when the
        // hardware has handed the buffer back (AVAILABLE clear).
        unsafe {
            self.buffer_ptr(ep, UsbDir::Out)
                .copy_to_nonoverlapping(buf.as_mut_ptr(), len);
        }
        len
    }

    fn ep_rx_enable(&mut self, ep: u8, max_len: usize) {
        let bc = buffer_control_index(ep, UsbDir::Out);
        let np = self.take_pid(bc);
        self.dpram.ep_buffer_control[bc].write(|w| unsafe {
            w.pid_0()
                .bit(np)
                .full_0()
                .clear_bit()
                .available_0()
                .set_bit()
                .length_0()
                .bits(max_len.min(BUFFER_SIZE) as u16)
        });
    }

    fn ep_stall(&mut self, ep_addr: u8) {
        let ep = endpoint_number(ep_addr);
        if ep == 0 {
            // EP0 stalls need arming as well; the arm clears itself on the
            // next SETUP.
            self.regs
                .ep_stall_arm
                .write(|w| w.ep0_in().set_bit().ep0_out().set_bit());
            for dir in [UsbDir::In, UsbDir::Out] {
                self.dpram.ep_buffer_control[buffer_control_index(0, dir)]
                    .write(|w| w.stall().set_bit());
            }
        } else {
            let bc = buffer_control_index(ep, UsbDir::of_endpoint_addr(ep_addr));
            self.dpram.ep_buffer_control[bc].write(|w| w.stall().set_bit());
        }
    }

    fn ep_clear_stall(&mut self, ep_addr: u8) {
        let bc = buffer_control_index(endpoint_number(ep_addr), UsbDir::of_endpoint_addr(ep_addr));
        self.dpram.ep_buffer_control[bc].write(|w| unsafe { w.bits(0) });
        self.set_pid(bc, false);
    }

    fn read_setup(&mut self, buf: &mut [u8; 8]) -> usize {
        // The PAC models the SETUP buffer as two words.
        buf[..4].copy_from_slice(&self.dpram.setup_packet_low.read().bits().to_le_bytes());
        buf[4..].copy_from_slice(&self.dpram.setup_packet_high.read().bits().to_le_bytes());
        // Every data or status packet after a SETUP starts at DATA1.
        self.set_pid(buffer_control_index(0, UsbDir::In), true);
        self.set_pid(buffer_control_index(0, UsbDir::Out), true);
        buf.len()
    }

    fn set_address(&mut self, address: u8) {
        self.regs.addr_endp.write(|w| unsafe { w.address().bits(address) });
    }

    fn millis(&self) -> u32 {
        // The raw registers don't latch, so reread the high word to catch a
        // carry between the two reads.
        loop {
            let hi = self.timer.timerawh.read().bits();
            let lo = self.timer.timerawl.read().bits();
            if self.timer.timerawh.read().bits() == hi {
                let us = (u64::from(hi) << 32) | u64::from(lo);
                return (us / 1000) as u32;
            }
        }
    }

    fn connect(&mut self) {
        // Pull-up on DP: full speed device present.
        self.regs.sie_ctrl.modify(|_, w| w.pullup_en().set_bit());
    }

    fn disconnect(&mut self) {
        self.regs.sie_ctrl.modify(|_, w| w.pullup_en().clear_bit());
    }
}

/// Masks `USBCTRL_IRQ` in the NVIC.
#[derive(Copy, Clone, Debug, Default)]
pub struct UsbIrqMask;

impl InterruptMask for UsbIrqMask {
    fn mask(&self) -> bool {
        let was_enabled = NVIC::is_enabled(Interrupt::USBCTRL_IRQ);
        NVIC::mask(Interrupt::USBCTRL_IRQ);
        was_enabled
    }

    fn restore(&self, was_enabled: bool) {
        if was_enabled {
            // Safety: only re-enables what `mask` found enabled, so no
            // critical section that relies on it being masked is active.
            unsafe { NVIC::unmask(Interrupt::USBCTRL_IRQ) }
        }
    }
}

/// Turns pending `INTS` bits into `TransactionHandler` calls. Call this from
/// the `USBCTRL_IRQ` handler.
pub fn dispatch<D, N>(core: &mut UsbCore<Rp2040Usb, D, N>)
where
    D: ClassDriver,
    N: TransactionHandler,
{
    let ints = core.hal().regs.ints.read();

    if ints.setup_req().bit() {
        // Write-one-to-clear.
        core.hal().regs.sie_status.write(|w| w.setup_rec().set_bit());
        core.transaction_setup(0);
    }

    if ints.buff_status().bit() {
        let orig_bufbits = core.hal().regs.buff_status.read().bits();
        let mut bufbits = orig_bufbits;
        while bufbits != 0 {
            let lowbit_index = bufbits.trailing_zeros();
            bufbits ^= 1 << lowbit_index;
            let ep = (lowbit_index >> 1) as u8;
            if lowbit_index & 1 == 0 {
                core.transaction_in(ep);
            } else {
                core.transaction_out(ep);
            }
        }
        core.hal().regs.buff_status.write(|w| unsafe { w.bits(orig_bufbits) });
    }

    if ints.bus_reset().bit() {
        core.hal().regs.sie_status.write(|w| w.bus_reset().set_bit());
        core.bus_reset();
    }

    if ints.dev_suspend().bit() {
        core.hal().regs.sie_status.write(|w| w.suspended().set_bit());
        core.suspend();
    }

    if ints.dev_resume_from_host().bit() {
        core.hal().regs.sie_status.write(|w| w.resume().set_bit());
        core.resume();
    }
}
