// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A pretend peripheral, and a pretend host driving it.
//!
//! `MockHal` records everything the core asks of the hardware. The helpers
//! below play the host's side of the bus: they stage a SETUP or OUT packet,
//! raise the matching completion event, and collect whatever the core
//! transmitted in response.

#![allow(dead_code)]

use std::cell::Cell;

use usb_acm_core::class::ClassDriver;
use usb_acm_core::control::ControlState;
use usb_acm_core::usb::{ControlRequest, UsbDir};
use usb_acm_core::{
    CdcAcm, DeviceConfig, EndpointSpec, InterruptMask, IrqMutex, TransactionHandler, UsbCore,
    UsbHal, EP0_SIZE, EP_COUNT,
};
use zerocopy::AsBytes;

#[derive(Debug, Default)]
pub struct MockHal {
    /// SETUP bytes `read_setup` will report.
    pub setup: Vec<u8>,
    /// The next packet `ep_read` will return, per endpoint.
    pub rx: [Vec<u8>; EP_COUNT],
    /// Every `ep_write`, in order.
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Every `ep_rx_enable`, in order.
    pub arms: Vec<(u8, usize)>,
    pub stalls: Vec<u8>,
    pub cleared: Vec<u8>,
    pub configured: Vec<EndpointSpec>,
    pub address: Option<u8>,
    pub connected: bool,
    pub now: Cell<u32>,
    /// How far the clock moves on every `millis` call.
    pub tick: u32,
}

impl MockHal {
    pub fn new() -> Self {
        Self {
            tick: 1,
            ..Self::default()
        }
    }

    pub fn writes_to(&self, ep: u8) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(e, _)| *e == ep)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn ep0_stalled(&self) -> bool {
        self.stalls.contains(&0)
    }
}

impl UsbHal for MockHal {
    fn ep_setup(&mut self, ep: &EndpointSpec) {
        self.configured.push(*ep);
    }

    fn ep_write(&mut self, ep: u8, data: &[u8]) {
        self.writes.push((ep, data.to_vec()));
    }

    fn ep_read(&mut self, ep: u8, buf: &mut [u8]) -> usize {
        let packet = std::mem::take(&mut self.rx[usize::from(ep)]);
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        n
    }

    fn ep_rx_enable(&mut self, ep: u8, max_len: usize) {
        self.arms.push((ep, max_len));
    }

    fn ep_stall(&mut self, ep_addr: u8) {
        self.stalls.push(ep_addr);
    }

    fn ep_clear_stall(&mut self, ep_addr: u8) {
        self.cleared.push(ep_addr);
    }

    fn read_setup(&mut self, buf: &mut [u8; 8]) -> usize {
        let n = self.setup.len().min(buf.len());
        buf[..n].copy_from_slice(&self.setup[..n]);
        self.setup.len()
    }

    fn set_address(&mut self, address: u8) {
        self.address = Some(address);
    }

    fn millis(&self) -> u32 {
        let t = self.now.get();
        self.now.set(t.wrapping_add(self.tick));
        t
    }

    fn connect(&mut self) {
        self.connected = true;
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Stands in for masking the USB interrupt; remembers whether it's masked.
#[derive(Debug, Default)]
pub struct TestMask {
    pub masked: Cell<bool>,
}

impl InterruptMask for TestMask {
    fn mask(&self) -> bool {
        !self.masked.replace(true)
    }

    fn restore(&self, was_enabled: bool) {
        if was_enabled {
            self.masked.set(false);
        }
    }
}

pub type TestCore<D = ()> = UsbCore<MockHal, D, ()>;
pub type Shared<D = ()> = IrqMutex<TestCore<D>, TestMask>;

pub fn config() -> DeviceConfig {
    DeviceConfig::new()
        .with_ids(0x1209, 0x0001)
        .with_strings("Acme", "Widget", Some("0001"))
}

pub fn core() -> TestCore {
    core_with(())
}

pub fn core_with<D: ClassDriver>(drivers: D) -> TestCore<D> {
    UsbCore::new(MockHal::new(), config(), CdcAcm::new(1), drivers, ())
}

pub fn shared(core: TestCore) -> Shared {
    IrqMutex::with_value(TestMask::default(), core)
}

/// Delivers a SETUP packet.
pub fn setup<D: ClassDriver>(core: &mut TestCore<D>, req: ControlRequest) {
    core.hal_mut().setup = req.as_bytes().to_vec();
    core.transaction_setup(0);
}

/// Runs a whole control read and returns the data stage, or `None` if the
/// device stalled.
pub fn control_read<D: ClassDriver>(core: &mut TestCore<D>, req: ControlRequest) -> Option<Vec<u8>> {
    core.hal_mut().stalls.clear();
    let mut seen = core.hal().writes.len();
    setup(core, req);
    let mut data = Vec::new();
    loop {
        if core.hal().ep0_stalled() {
            return None;
        }
        let new: Vec<_> = core.hal().writes[seen..]
            .iter()
            .filter(|(ep, _)| *ep == 0)
            .map(|(_, p)| p.clone())
            .collect();
        seen = core.hal().writes.len();
        if new.is_empty() {
            break;
        }
        for packet in new {
            assert!(packet.len() <= EP0_SIZE);
            data.extend_from_slice(&packet);
            core.transaction_in(0);
        }
        if core.control_state() == ControlState::StatusPending(UsbDir::Out) {
            // Host's status ZLP.
            core.hal_mut().rx[0].clear();
            core.transaction_out(0);
            break;
        }
    }
    Some(data)
}

/// Runs a whole control write, data stage split into EP0-sized packets.
/// Returns whether the device accepted it.
pub fn control_write<D: ClassDriver>(
    core: &mut TestCore<D>,
    req: ControlRequest,
    payload: &[u8],
) -> bool {
    core.hal_mut().stalls.clear();
    setup(core, req);
    for chunk in payload.chunks(EP0_SIZE) {
        if core.hal().ep0_stalled() {
            return false;
        }
        core.hal_mut().rx[0] = chunk.to_vec();
        core.transaction_out(0);
    }
    if core.hal().ep0_stalled() {
        return false;
    }
    let status_sent = matches!(core.hal().writes.last(), Some((0, p)) if p.is_empty());
    if core.control_state() != ControlState::StatusPending(UsbDir::In) || !status_sent {
        return false;
    }
    // Host collects the status ZLP.
    core.transaction_in(0);
    true
}

pub fn set_address<D: ClassDriver>(core: &mut TestCore<D>, address: u8) -> bool {
    control_write(core, ControlRequest::new(0x00, 0x05, address.into(), 0, 0), &[])
}

pub fn set_configuration<D: ClassDriver>(core: &mut TestCore<D>, value: u8) -> bool {
    control_write(core, ControlRequest::new(0x00, 0x09, value.into(), 0, 0), &[])
}

pub fn set_line_state<D: ClassDriver>(core: &mut TestCore<D>, state: u8) -> bool {
    control_write(core, ControlRequest::new(0x21, 0x22, state.into(), 0, 0), &[])
}

pub fn set_line_coding<D: ClassDriver>(core: &mut TestCore<D>, coding: &[u8]) -> bool {
    let req = ControlRequest::new(0x21, 0x20, 0, 0, coding.len() as u16);
    control_write(core, req, coding)
}

pub fn get_line_coding<D: ClassDriver>(core: &mut TestCore<D>) -> Option<Vec<u8>> {
    control_read(core, ControlRequest::new(0xA1, 0x21, 0, 0, 7))
}

/// Reset, address, configure: what a host does on plug-in.
pub fn enumerate<D: ClassDriver>(core: &mut TestCore<D>) {
    core.bus_reset();
    assert!(set_address(core, 5));
    assert!(set_configuration(core, 1));
}

/// Enumerated, with a terminal holding the port open.
pub fn opened() -> TestCore {
    let mut core = core();
    enumerate(&mut core);
    assert!(set_line_state(&mut core, 0x03));
    core
}

/// The host sends `data` on OUT endpoint `ep`.
pub fn host_out<D: ClassDriver>(core: &mut TestCore<D>, ep: u8, data: &[u8]) {
    core.hal_mut().rx[usize::from(ep)] = data.to_vec();
    core.transaction_out(ep);
}
