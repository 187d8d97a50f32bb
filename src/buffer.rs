// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software staging buffers for the data endpoints.
//!
//! The peripheral gives each endpoint a single packet-sized slot in packet
//! memory, and only the interrupt handler finds out when that slot is free
//! again. An `EndpointBuffer` sits between the two: foreground code pushes
//! bytes into it or pops bytes out of it, and the completion callbacks move
//! whole packets between it and the hardware.
//!
//! For IN endpoints this amounts to software double buffering. While one
//! packet is in flight the next one accumulates here, and a `flush` issued
//! during that window is remembered (`pending_flush`) and replayed by the
//! IN-completion callback, so at most one packet is ever outstanding and none
//! is lost or reordered.
//!
//! For OUT endpoints the buffer holds the most recent packet until it has
//! been completely popped, and only then re-arms reception. A consumer that
//! stops reading therefore makes the host see NAKs, which is the backpressure
//! mechanism. The one exception is a zero-length packet, which re-arms
//! reception immediately because there is nothing to pop.
//!
//! None of the methods here do their own locking. Every one of them mutates
//! state the interrupt handler also mutates, so callers reach them through
//! `IrqMutex`.

use log::trace;

/// What a buffer needs from the hardware. Implemented over `UsbHal` by the
/// device core, and by recorders in tests.
pub trait EndpointIo {
    /// Whether the device is far enough through enumeration for IN data to
    /// mean anything to the host. Flushes while offline are discarded.
    fn online(&self) -> bool;

    /// Starts transmission of one packet on IN endpoint `ep`.
    fn write_packet(&mut self, ep: u8, data: &[u8]);

    /// Arms OUT endpoint `ep` for one packet of up to `max_len` bytes.
    fn arm_out(&mut self, ep: u8, max_len: usize);
}

/// Staging buffer of capacity `L` for one endpoint.
///
/// For IN, `cursor` counts bytes queued. For OUT, `tail` is the size of the
/// received packet and `cursor` the number of bytes already popped. Either
/// way `cursor <= tail <= L`.
#[derive(Debug)]
pub struct EndpointBuffer<const L: usize> {
    ep: u8,
    buf: [u8; L],
    cursor: usize,
    tail: usize,
    /// A packet handed to hardware hasn't been collected yet.
    tx_waiting: bool,
    /// A flush arrived while `tx_waiting`; the IN callback will redo it.
    pending_flush: bool,
    /// Reception is armed and no packet has landed yet.
    rx_waiting: bool,
    /// The last packet was exactly `L` bytes, so the next flush owes the
    /// host a ZLP even if it has no data.
    send_zlp: bool,
}

impl<const L: usize> EndpointBuffer<L> {
    pub const fn new(ep: u8) -> Self {
        Self {
            ep,
            buf: [0; L],
            cursor: 0,
            tail: 0,
            tx_waiting: false,
            pending_flush: false,
            rx_waiting: false,
            send_zlp: false,
        }
    }

    /// Returns the buffer to its power-on state, bound to `ep`.
    pub fn init(&mut self, ep: u8) {
        self.ep = ep;
        self.reset();
        self.tx_waiting = false;
        self.pending_flush = false;
        self.rx_waiting = false;
        self.send_zlp = false;
    }

    pub fn endpoint(&self) -> u8 {
        self.ep
    }

    /// Empties the buffer without touching the flags.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.tail = 0;
    }

    /// Bytes queued for IN, or bytes already consumed for OUT.
    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Bytes received on OUT and not yet popped.
    pub fn available(&self) -> usize {
        self.tail - self.cursor
    }

    /// Room left for IN data. Reports 0 while a flush is pending so that
    /// bytes from two separate writes never get merged into one packet.
    pub fn send_space(&self) -> usize {
        if self.pending_flush {
            0
        } else {
            L - self.cursor
        }
    }

    pub fn tx_waiting(&self) -> bool {
        self.tx_waiting
    }

    pub fn pending_flush(&self) -> bool {
        self.pending_flush
    }

    pub fn rx_waiting(&self) -> bool {
        self.rx_waiting
    }

    pub fn zlp_owed(&self) -> bool {
        self.send_zlp
    }

    /// Queues as much of `data` as fits and returns how much that was. A
    /// buffer that ends up full is flushed immediately.
    pub fn push(&mut self, data: &[u8], io: &mut impl EndpointIo) -> usize {
        let w = self.send_space().min(data.len());
        self.buf[self.cursor..self.cursor + w].copy_from_slice(&data[..w]);
        self.cursor += w;
        self.tail = self.cursor;
        if self.send_space() == 0 {
            self.flush(io);
        }
        w
    }

    /// Moves up to `dest.len()` received bytes into `dest`. Once the packet
    /// is fully consumed the endpoint is re-armed for the next one.
    pub fn pop(&mut self, dest: &mut [u8], io: &mut impl EndpointIo) -> usize {
        let r = self.available().min(dest.len());
        dest[..r].copy_from_slice(&self.buf[self.cursor..self.cursor + r]);
        self.cursor += r;
        if self.available() == 0 {
            self.enable_out_endpoint(io);
        }
        r
    }

    /// Hands the queued bytes to the hardware as one packet, or arranges for
    /// that to happen as soon as the hardware is free.
    pub fn flush(&mut self, io: &mut impl EndpointIo) {
        if self.cursor == 0 && !self.send_zlp {
            return;
        }
        if self.pending_flush {
            // The IN callback is already going to do this.
            return;
        }
        if !io.online() {
            trace!("ep{} flush of {} dropped, not configured", self.ep, self.cursor);
            self.send_zlp = false;
            self.reset();
            return;
        }
        if self.tx_waiting {
            // Keep the bytes where they are; `on_in_transfer_done` retries.
            self.pending_flush = true;
            trace!("ep{} flush of {} deferred", self.ep, self.cursor);
            return;
        }
        self.tx_waiting = true;
        // A full packet doesn't end a transfer as far as the host is
        // concerned, so the next flush terminates it with a ZLP. Anything
        // shorter clears the debt, so two ZLPs never go out back to back.
        self.send_zlp = self.cursor == L;
        trace!("ep{} > {}", self.ep, self.cursor);
        io.write_packet(self.ep, &self.buf[..self.cursor]);
        self.reset();
    }

    /// Arms reception into this buffer unless it is already armed.
    pub fn enable_out_endpoint(&mut self, io: &mut impl EndpointIo) {
        if self.rx_waiting {
            return;
        }
        self.rx_waiting = true;
        self.reset();
        io.arm_out(self.ep, L);
    }

    /// Where the OUT callback copies the received packet before calling
    /// `on_out_transfer_done`.
    pub fn rx_buffer_mut(&mut self) -> &mut [u8; L] {
        &mut self.buf
    }

    /// IN callback: the hardware slot is free again.
    pub fn on_in_transfer_done(&mut self, io: &mut impl EndpointIo) {
        self.tx_waiting = false;
        if self.pending_flush {
            self.pending_flush = false;
            self.flush(io);
        }
    }

    /// OUT callback: `count` bytes are now in `rx_buffer_mut()`.
    pub fn on_out_transfer_done(&mut self, count: usize, io: &mut impl EndpointIo) {
        trace!("ep{} < {}", self.ep, count);
        self.cursor = 0;
        self.tail = count.min(L);
        // Cleared first so that the re-arm below isn't a no-op.
        self.rx_waiting = false;
        if count == 0 {
            // A ZLP leaves nothing for `pop` to drain, so if we waited for
            // one the endpoint would never re-arm and the host would see NAK
            // forever.
            self.enable_out_endpoint(io);
        }
    }

    /// Throws away bytes that were queued but not handed to hardware, after
    /// a send gave up waiting. A packet already in flight is unaffected.
    pub fn abort_pending(&mut self) {
        if self.pending_flush || !self.tx_waiting {
            trace!("ep{} discarding {} unsent", self.ep, self.cursor);
            self.pending_flush = false;
            self.reset();
        }
    }
}

/// One `EndpointBuffer` per endpoint number. Slot 0 exists only so that
/// endpoint numbers index directly; the control endpoint never uses it.
#[derive(Debug)]
pub struct EndpointBufferSet<const L: usize, const C: usize> {
    bufs: [EndpointBuffer<L>; C],
}

impl<const L: usize, const C: usize> EndpointBufferSet<L, C> {
    pub fn new() -> Self {
        Self {
            bufs: core::array::from_fn(|ep| EndpointBuffer::new(ep as u8)),
        }
    }

    /// Re-initializes every buffer. Done on bus reset.
    pub fn init_all(&mut self) {
        for (ep, b) in self.bufs.iter_mut().enumerate() {
            b.init(ep as u8);
        }
    }

    pub fn buf(&mut self, ep: u8) -> Option<&mut EndpointBuffer<L>> {
        self.bufs.get_mut(usize::from(ep))
    }

    pub fn get(&self, ep: u8) -> Option<&EndpointBuffer<L>> {
        self.bufs.get(usize::from(ep))
    }
}

impl<const L: usize, const C: usize> Default for EndpointBufferSet<L, C> {
    fn default() -> Self {
        Self::new()
    }
}
