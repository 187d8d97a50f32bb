// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoint 0 transfer staging.
//!
//! A control transfer is SETUP, an optional data stage, then a status stage
//! in the opposite direction. `ControlTransfer` holds everything the engine
//! needs between those stages: the captured request, the static data buffer,
//! and where we are in the exchange. Class drivers see it as the thing they
//! `send` replies into and `recv` payloads out of.
//!
//! The hardware side (which packets to write, when to arm OUT, when to stall)
//! lives in `device`; this module never touches the peripheral.

use core::ops::Range;

use crate::usb::ControlRequest;
use crate::{CTL_BUFFER_SIZE, EP0_SIZE};

/// Where endpoint 0 is within a control transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlState {
    /// Nothing in progress; the next thing we expect is SETUP.
    Idle,
    /// Sending a control read's data stage, one packet per IN completion.
    DataIn,
    /// A control write was accepted provisionally at SETUP time and its
    /// payload hasn't fully arrived. The class driver gets to look at the
    /// request only once it has.
    AwaitingDataOut,
    /// Waiting for the zero-length status packet, which travels in the given
    /// direction.
    StatusPending(crate::usb::UsbDir),
}

/// Flags for `ControlTransfer::send`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferFlags(u8);

impl TransferFlags {
    pub const NONE: Self = Self(0);
    /// Queue zeros instead of the caller's bytes.
    pub const ZERO: Self = Self(0x20);
    /// This is the last piece of the reply.
    pub const RELEASE: Self = Self(0x40);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for TransferFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub struct ControlTransfer {
    buf: [u8; CTL_BUFFER_SIZE],
    /// Bytes queued by `send`, or bytes consumed by `recv`.
    idx: usize,
    /// How many more bytes `send` may queue.
    max_write: usize,
    /// Declared length of the OUT data stage.
    out_len: usize,
    /// OUT bytes landed so far.
    received: usize,
    /// IN bytes handed to the hardware so far.
    in_sent: usize,
    in_done: bool,
    request: ControlRequest,
    state: ControlState,
}

impl ControlTransfer {
    pub const fn new() -> Self {
        Self {
            buf: [0; CTL_BUFFER_SIZE],
            idx: 0,
            max_write: 0,
            out_len: 0,
            received: 0,
            in_sent: 0,
            in_done: false,
            request: ControlRequest::new(0, 0, 0, 0, 0),
            state: ControlState::Idle,
        }
    }

    /// Starts a new transfer for `request`, discarding anything left from the
    /// previous one. Replies are capped at the host's `wLength`.
    pub fn begin(&mut self, request: ControlRequest) {
        self.request = request;
        self.start(usize::from(request.length()));
        self.state = ControlState::Idle;
    }

    /// Resets the buffer with a write budget of `budget` bytes, keeping the
    /// current request. A budget of zero turns `send` into a length probe.
    pub fn start(&mut self, budget: usize) {
        self.idx = 0;
        self.max_write = budget.min(CTL_BUFFER_SIZE);
        self.out_len = 0;
        self.received = 0;
        self.in_sent = 0;
        self.in_done = false;
    }

    pub fn request(&self) -> &ControlRequest {
        &self.request
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn set_state(&mut self, state: ControlState) {
        self.state = state;
    }

    /// Appends `data` (or as many zeros, with `TransferFlags::ZERO`) to the
    /// reply, as far as the remaining budget allows.
    ///
    /// Always returns `data.len()`, however much was actually queued.
    /// Descriptor sizes are measured by calling the same emitting code with a
    /// budget of zero and adding up the return values, so a short count here
    /// would make the measured total wrong.
    pub fn send(&mut self, flags: TransferFlags, data: &[u8]) -> usize {
        let n = data.len().min(self.max_write);
        let dest = &mut self.buf[self.idx..self.idx + n];
        if flags.contains(TransferFlags::ZERO) {
            dest.fill(0);
        } else {
            dest.copy_from_slice(&data[..n]);
        }
        self.idx += n;
        self.max_write -= n;
        data.len()
    }

    /// Bytes queued by `send` so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.idx]
    }

    /// Copies the next part of a received control-write payload into `dest`.
    /// Returns 0 once the payload is exhausted.
    pub fn recv(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.out_len.saturating_sub(self.idx));
        dest[..n].copy_from_slice(&self.buf[self.idx..self.idx + n]);
        self.idx += n;
        n
    }

    /// Prepares to receive a data stage of `len` bytes. The caller has
    /// already checked `len` against `CTL_BUFFER_SIZE`.
    pub fn expect_out(&mut self, len: usize) {
        self.start(0);
        self.out_len = len.min(CTL_BUFFER_SIZE);
        self.state = ControlState::AwaitingDataOut;
    }

    /// Stores one data-stage packet. Returns true once the whole payload is
    /// in, either because `out_len` bytes arrived or because the host ended
    /// the stage early with a short packet.
    pub fn accept_out(&mut self, packet: &[u8]) -> bool {
        let n = packet.len().min(self.out_len - self.received);
        self.buf[self.received..self.received + n].copy_from_slice(&packet[..n]);
        self.received += n;
        if packet.len() < EP0_SIZE {
            self.out_len = self.received;
        }
        self.received >= self.out_len
    }

    /// Room for the next OUT packet.
    pub fn out_remaining(&self) -> usize {
        self.out_len - self.received
    }

    /// The next data-IN packet, as a range of `written()`, or `None` once
    /// the stage is complete.
    ///
    /// A reply that ends exactly on a packet boundary but is shorter than
    /// `wLength` is terminated with a ZLP, otherwise the host keeps asking.
    pub fn next_in_packet(&mut self) -> Option<Range<usize>> {
        if self.in_done {
            return None;
        }
        let start = self.in_sent;
        let end = (start + EP0_SIZE).min(self.idx);
        self.in_sent = end;
        if end - start < EP0_SIZE || end == usize::from(self.request.length()) {
            self.in_done = true;
        }
        Some(start..end)
    }

    pub fn packet(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }
}

impl Default for ControlTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::{UsbDir, UsbSetupRequest};

    fn read_request(length: u16) -> ControlRequest {
        ControlRequest::new(UsbDir::In as u8, UsbSetupRequest::GetDescriptor as u8, 0x0200, 0, length)
    }

    #[test]
    fn send_echoes_length_with_zero_budget() {
        let mut ct = ControlTransfer::new();
        ct.start(0);
        assert_eq!(ct.send(TransferFlags::NONE, &[1; 40]), 40);
        assert_eq!(ct.send(TransferFlags::RELEASE, &[1; 3]), 3);
        assert!(ct.written().is_empty());
    }

    #[test]
    fn send_is_capped_by_wlength() {
        let mut ct = ControlTransfer::new();
        ct.begin(read_request(4));
        assert_eq!(ct.send(TransferFlags::NONE, b"abcdef"), 6);
        assert_eq!(ct.written(), b"abcd");
    }

    #[test]
    fn zero_flag_queues_zeros() {
        let mut ct = ControlTransfer::new();
        ct.begin(read_request(8));
        ct.send(TransferFlags::NONE, b"ab");
        ct.send(TransferFlags::ZERO | TransferFlags::RELEASE, b"xyz");
        assert_eq!(ct.written(), b"ab\0\0\0");
    }

    #[test]
    fn recv_drains_then_returns_zero() {
        let mut ct = ControlTransfer::new();
        ct.expect_out(7);
        assert!(ct.accept_out(&[1, 2, 3, 4, 5, 6, 7]));
        let mut d = [0; 4];
        assert_eq!(ct.recv(&mut d), 4);
        assert_eq!(ct.recv(&mut d), 3);
        assert_eq!(&d[..3], &[5, 6, 7]);
        assert_eq!(ct.recv(&mut d), 0);
    }

    #[test]
    fn out_payload_spans_packets() {
        let mut ct = ControlTransfer::new();
        ct.expect_out(EP0_SIZE + 6);
        assert_eq!(ct.state(), ControlState::AwaitingDataOut);
        assert!(!ct.accept_out(&[0xaa; EP0_SIZE]));
        assert_eq!(ct.out_remaining(), 6);
        assert!(ct.accept_out(&[0xbb; 6]));
        let mut d = [0; 2 * EP0_SIZE];
        assert_eq!(ct.recv(&mut d), EP0_SIZE + 6);
        assert_eq!(d[EP0_SIZE], 0xbb);
    }

    #[test]
    fn exact_fit_reply_has_no_zlp() {
        let mut ct = ControlTransfer::new();
        ct.begin(read_request(EP0_SIZE as u16));
        ct.send(TransferFlags::NONE, &[0; EP0_SIZE]);
        assert_eq!(ct.next_in_packet(), Some(0..EP0_SIZE));
        assert_eq!(ct.next_in_packet(), None);
    }

    #[test]
    fn short_reply_on_boundary_gets_zlp() {
        let mut ct = ControlTransfer::new();
        ct.begin(read_request(255));
        ct.send(TransferFlags::NONE, &[0; 2 * EP0_SIZE]);
        assert_eq!(ct.next_in_packet(), Some(0..EP0_SIZE));
        assert_eq!(ct.next_in_packet(), Some(EP0_SIZE..2 * EP0_SIZE));
        assert_eq!(ct.next_in_packet(), Some(2 * EP0_SIZE..2 * EP0_SIZE));
        assert_eq!(ct.next_in_packet(), None);
    }

    #[test]
    fn short_reply_is_one_packet() {
        let mut ct = ControlTransfer::new();
        ct.begin(read_request(255));
        ct.send(TransferFlags::NONE, b"hello");
        let r = ct.next_in_packet().unwrap();
        assert_eq!(ct.packet(r), b"hello");
        assert_eq!(ct.next_in_packet(), None);
    }
}
