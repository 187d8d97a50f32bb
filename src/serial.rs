// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The serial port as application code sees it.
//!
//! `CdcSerial` is a cheap handle on the shared core. Every call takes the
//! lock for as long as it needs and no longer, so it can be used freely from
//! foreground code while the interrupt keeps the bus moving.

use log::debug;

use crate::cdc::LineCoding;
use crate::class::ClassDriver;
use crate::critical::{InterruptMask, IrqMutex};
use crate::device::UsbCore;
use crate::error::Error;
use crate::hal::{TransactionHandler, UsbHal};

pub struct CdcSerial<'a, H, D, N, M>
where
    H: UsbHal,
    D: ClassDriver,
    N: TransactionHandler,
    M: InterruptMask,
{
    usb: &'a IrqMutex<UsbCore<H, D, N>, M>,
}

impl<'a, H, D, N, M> CdcSerial<'a, H, D, N, M>
where
    H: UsbHal,
    D: ClassDriver,
    N: TransactionHandler,
    M: InterruptMask,
{
    pub fn new(usb: &'a IrqMutex<UsbCore<H, D, N>, M>) -> Self {
        Self { usb }
    }

    /// Forgets any peeked byte. The line parameters belong to the host, so
    /// there is nothing else to set up.
    pub fn begin(&self) {
        self.usb.lock(|core| core.cdc_mut().set_peeked(None));
    }

    /// Bytes ready to read, counting a peeked one.
    pub fn available(&self) -> usize {
        self.usb.lock(|core| {
            let out = core.cdc().out_endpoint();
            usize::from(core.cdc().peeked().is_some()) + core.available(out)
        })
    }

    /// The next byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.usb.lock(|core| {
            if core.cdc().peeked().is_none() {
                let octet = recv_octet(core);
                core.cdc_mut().set_peeked(octet);
            }
            core.cdc().peeked()
        })
    }

    pub fn read(&self) -> Option<u8> {
        self.usb.lock(|core| match core.cdc().peeked() {
            Some(octet) => {
                core.cdc_mut().set_peeked(None);
                Some(octet)
            }
            None => recv_octet(core),
        })
    }

    /// Reads as much as is ready into `buf`.
    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        self.usb.lock(|core| {
            let mut n = 0;
            if let Some(octet) = core.cdc().peeked() {
                core.cdc_mut().set_peeked(None);
                buf[0] = octet;
                n = 1;
            }
            let out = core.cdc().out_endpoint();
            n + core.recv(out, &mut buf[n..]).unwrap_or(0)
        })
    }

    /// Writes `data` and flushes it. Returns 0 and sets the write error flag
    /// if the port isn't open or the host stops collecting data.
    pub fn write(&self, data: &[u8]) -> usize {
        match self.try_write(data) {
            Ok(n) => n,
            Err(e) => {
                debug!("cdc: write failed: {}", e);
                self.set_write_error();
                0
            }
        }
    }

    /// `write`, saying why when nothing was written. Leaves the write error
    /// flag alone.
    pub fn try_write(&self, data: &[u8]) -> Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }
        let (ep, configured, connected) = self.usb.lock(|core| {
            (
                core.cdc().in_endpoint(),
                core.configured(),
                core.cdc().connected(),
            )
        });
        if !configured {
            return Err(Error::NotConfigured);
        }
        if !connected {
            return Err(Error::LineInactive);
        }
        let n = self.usb.send(ep, data)?;
        self.flush();
        Ok(n)
    }

    pub fn write_byte(&self, octet: u8) -> usize {
        self.write(&[octet])
    }

    pub fn flush(&self) {
        self.usb.lock(|core| {
            let ep = core.cdc().in_endpoint();
            // Can't fail: the endpoint is ours and nonzero.
            let _ = core.flush(ep);
        });
    }

    /// How much can be written without blocking.
    pub fn available_for_write(&self) -> usize {
        self.usb.lock(|core| {
            let ep = core.cdc().in_endpoint();
            core.send_space(ep)
        })
    }

    pub fn connected(&self) -> bool {
        self.usb.lock(|core| core.cdc().connected())
    }

    pub fn dtr(&self) -> bool {
        self.usb.lock(|core| core.cdc().dtr())
    }

    pub fn rts(&self) -> bool {
        self.usb.lock(|core| core.cdc().rts())
    }

    pub fn line_coding(&self) -> LineCoding {
        self.usb.lock(|core| core.cdc().line_coding())
    }

    pub fn baud(&self) -> u32 {
        self.line_coding().rate()
    }

    /// Most recent `SEND_BREAK` duration in ms, if one arrived since the
    /// last call. `cdc::BREAK_INDEFINITE` means until further notice.
    pub fn take_break(&self) -> Option<u16> {
        self.usb.lock(|core| core.cdc_mut().take_break())
    }

    /// Whether the host asked for a reboot into the bootloader.
    pub fn touch_requested(&self) -> bool {
        self.usb.lock(|core| core.cdc_mut().touch_requested())
    }

    pub fn write_error(&self) -> bool {
        self.usb.lock(|core| core.cdc().write_error())
    }

    pub fn clear_write_error(&self) {
        self.usb.lock(|core| core.cdc_mut().clear_write_error());
    }

    fn set_write_error(&self) {
        self.usb.lock(|core| core.cdc_mut().set_write_error());
    }
}

fn recv_octet<H, D, N>(core: &mut UsbCore<H, D, N>) -> Option<u8>
where
    H: UsbHal,
    D: ClassDriver,
    N: TransactionHandler,
{
    let mut octet = [0];
    let out = core.cdc().out_endpoint();
    match core.recv(out, &mut octet) {
        Ok(1) => Some(octet[0]),
        _ => None,
    }
}
