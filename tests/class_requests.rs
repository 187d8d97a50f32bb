// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Class and vendor requests routed to a driver other than CDC, mostly to
//! watch the deferred handling of control writes.

mod common;

use common::*;
use usb_acm_core::control::{ControlState, ControlTransfer, TransferFlags};
use usb_acm_core::usb::{ControlRequest, UsbInterfaceDescriptor};
use usb_acm_core::{ClassDriver, TransactionHandler};
use zerocopy::AsBytes;

/// A vendor interface that records every control write it's shown.
#[derive(Default)]
struct Probe {
    interface: u8,
    reject: bool,
    writes: Vec<Vec<u8>>,
    completed: u32,
    resets: u32,
}

impl ClassDriver for Probe {
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize {
        self.interface = *interface_count;
        *interface_count += 1;
        let desc = UsbInterfaceDescriptor::new(self.interface, 0, 0xFF, 0, 0);
        ct.send(TransferFlags::NONE, desc.as_bytes())
    }

    fn setup(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> bool {
        if req.index() != u16::from(self.interface) {
            return false;
        }
        if req.is_control_write() {
            let mut payload = vec![0; usize::from(req.length())];
            let n = ct.recv(&mut payload);
            payload.truncate(n);
            self.writes.push(payload);
            !self.reject
        } else if req.length() != 0 {
            ct.send(TransferFlags::RELEASE, b"probe");
            true
        } else {
            !self.reject
        }
    }

    fn control_in_complete(&mut self, _req: &ControlRequest) {
        self.completed += 1;
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

const VENDOR_OUT: u8 = 0x41;
const VENDOR_IN: u8 = 0xC1;

fn probe_core() -> TestCore<Probe> {
    let mut core = core_with(Probe::default());
    enumerate(&mut core);
    core
}

#[test]
fn probe_gets_the_next_interface() {
    let core = probe_core();
    let desc = core.config_descriptor();
    assert_eq!(desc.len(), 75 + 9);
    assert_eq!(desc[4], 3);
    assert_eq!(&desc[75..78], &[9, 0x04, 2]);
}

#[test]
fn oversized_configuration_is_refused() {
    // 21 more interfaces put the descriptor past the control buffer.
    let mut core = core_with(<[Probe; 21]>::default());
    core.bus_reset();
    assert_eq!(core.config_descriptor().len(), 256);
    let get_config = ControlRequest::new(0x80, 0x06, 0x0200, 0, 9);
    assert!(control_read(&mut core, get_config).is_none());
    assert!(core.hal().ep0_stalled());
    // The device descriptor is still fine.
    assert!(control_read(&mut core, ControlRequest::new(0x80, 0x06, 0x0100, 0, 18)).is_some());
}

#[test]
fn driver_sees_write_only_after_data_stage() {
    let mut core = probe_core();
    core.hal_mut().arms.clear();
    core.hal_mut().writes.clear();
    setup(&mut core, ControlRequest::new(VENDOR_OUT, 0x01, 0, 2, 10));

    assert!(core.drivers_mut().writes.is_empty());
    assert_eq!(core.control_state(), ControlState::AwaitingDataOut);
    assert_eq!(core.hal().arms, [(0, 10)]);
    // No status yet: the request hasn't been judged.
    assert!(core.hal().writes.is_empty());

    host_out(&mut core, 0, b"0123456789");
    assert_eq!(core.drivers_mut().writes, [b"0123456789".to_vec()]);
    assert_eq!(core.hal().writes.last(), Some(&(0, vec![])));
    core.transaction_in(0);
    assert_eq!(core.control_state(), ControlState::Idle);
}

#[test]
fn multi_packet_write() {
    let mut core = probe_core();
    let payload: Vec<u8> = (0..100).collect();
    core.hal_mut().arms.clear();
    assert!(control_write(
        &mut core,
        ControlRequest::new(VENDOR_OUT, 0x01, 0, 2, 100),
        &payload
    ));
    assert_eq!(core.drivers_mut().writes, [payload]);
    assert_eq!(core.hal().arms, [(0, 64), (0, 36)]);
}

#[test]
fn host_may_end_the_data_stage_early() {
    let mut core = probe_core();
    assert!(control_write(
        &mut core,
        ControlRequest::new(VENDOR_OUT, 0x01, 0, 2, 10),
        b"abcd"
    ));
    assert_eq!(core.drivers_mut().writes, [b"abcd".to_vec()]);
}

#[test]
fn rejected_write_stalls_after_data() {
    let mut core = probe_core();
    core.drivers_mut().reject = true;
    setup(&mut core, ControlRequest::new(VENDOR_OUT, 0x01, 0, 2, 3));
    assert!(!core.hal().ep0_stalled());
    host_out(&mut core, 0, b"abc");
    assert!(core.hal().ep0_stalled());
    assert_eq!(core.control_state(), ControlState::Idle);
    assert_eq!(core.drivers_mut().writes.len(), 1);
}

#[test]
fn oversized_write_stalls_at_setup() {
    let mut core = probe_core();
    core.hal_mut().arms.clear();
    setup(&mut core, ControlRequest::new(VENDOR_OUT, 0x01, 0, 2, 300));
    assert!(core.hal().ep0_stalled());
    assert!(core.hal().arms.is_empty());
    assert!(core.drivers_mut().writes.is_empty());
}

#[test]
fn write_without_data_goes_straight_to_the_driver() {
    let mut core = probe_core();
    assert!(control_write(&mut core, ControlRequest::new(VENDOR_OUT, 0x02, 0, 2, 0), &[]));
    assert!(core.drivers_mut().writes.is_empty());

    core.drivers_mut().reject = true;
    assert!(!control_write(&mut core, ControlRequest::new(VENDOR_OUT, 0x02, 0, 2, 0), &[]));
}

#[test]
fn nobody_claims_it() {
    let mut core = probe_core();
    assert!(!control_write(
        &mut core,
        ControlRequest::new(VENDOR_OUT, 0x01, 0, 7, 2),
        b"hi"
    ));
    assert!(core.drivers_mut().writes.is_empty());
}

#[test]
fn vendor_read() {
    let mut core = probe_core();
    let data = control_read(&mut core, ControlRequest::new(VENDOR_IN, 0x01, 0, 2, 64)).unwrap();
    assert_eq!(data, b"probe");
    assert!(core.drivers_mut().completed >= 1);
}

#[test]
fn new_setup_abandons_a_pending_write() {
    let mut core = probe_core();
    setup(&mut core, ControlRequest::new(VENDOR_OUT, 0x01, 0, 2, 10));
    assert!(control_read(&mut core, ControlRequest::new(0x80, 0x06, 0x0100, 0, 18)).is_some());
    // A late data packet from the abandoned transfer goes nowhere.
    host_out(&mut core, 0, b"0123456789");
    assert!(core.drivers_mut().writes.is_empty());
}

#[test]
fn drivers_hear_about_bus_reset() {
    let mut core = probe_core();
    let before = core.drivers_mut().resets;
    core.bus_reset();
    assert_eq!(core.drivers_mut().resets, before + 1);
}
