// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Class drivers, as the device core sees them.
//!
//! The core doesn't keep a registry. Whatever set of drivers the firmware
//! wants is handed to `UsbCore` as one value implementing `ClassDriver`,
//! built out of the composite impls below: a pair `(a, b)`, an array or
//! slice of `&mut dyn ClassDriver`, or `()` for none. Interface and endpoint
//! numbering is the firmware's business; the core only passes the running
//! interface counter through.

use crate::control::ControlTransfer;
use crate::hal::EndpointSpec;
use crate::usb::ControlRequest;

pub trait ClassDriver {
    /// Emits this driver's interface, functional, and endpoint descriptors
    /// through `ct.send` and returns the total `send` reported.
    ///
    /// Called twice per configuration descriptor: once with a zero budget
    /// to measure, once for real. Both calls must produce the same length,
    /// and each must advance `interface_count` by the number of interfaces
    /// the driver owns; the counter is rewound between the passes.
    ///
    /// All drivers together share `CTL_BUFFER_SIZE` bytes, less the 9-byte
    /// configuration header. A device whose drivers emit more than that
    /// stalls every request for its configuration descriptor.
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize;

    /// Handles a `GET_DESCRIPTOR` for a type the core doesn't know. Returns
    /// bytes sent, 0 if the request isn't this driver's, negative to stall.
    fn get_descriptor(&mut self, _req: &ControlRequest, _ct: &mut ControlTransfer) -> isize {
        0
    }

    /// Handles a class or vendor request. For control writes the payload is
    /// already in `ct` and can be read with `ct.recv`. Returns whether the
    /// request was understood and accepted.
    fn setup(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> bool;

    /// A control read that this driver answered has finished its data stage.
    fn control_in_complete(&mut self, _req: &ControlRequest) {}

    /// Reports each non-control endpoint the driver needs configured.
    fn for_each_endpoint(&self, _f: &mut dyn FnMut(&EndpointSpec)) {}

    /// Bus reset.
    fn reset(&mut self) {}
}

impl ClassDriver for () {
    fn get_interface(&mut self, _: &mut u8, _: &mut ControlTransfer) -> usize {
        0
    }

    fn setup(&mut self, _: &ControlRequest, _: &mut ControlTransfer) -> bool {
        false
    }
}

impl<T: ClassDriver + ?Sized> ClassDriver for &mut T {
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize {
        (**self).get_interface(interface_count, ct)
    }

    fn get_descriptor(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> isize {
        (**self).get_descriptor(req, ct)
    }

    fn setup(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> bool {
        (**self).setup(req, ct)
    }

    fn control_in_complete(&mut self, req: &ControlRequest) {
        (**self).control_in_complete(req)
    }

    fn for_each_endpoint(&self, f: &mut dyn FnMut(&EndpointSpec)) {
        (**self).for_each_endpoint(f)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Two drivers in registration order. The first one to claim a request
/// wins.
impl<A: ClassDriver, B: ClassDriver> ClassDriver for (A, B) {
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize {
        self.0.get_interface(interface_count, ct) + self.1.get_interface(interface_count, ct)
    }

    fn get_descriptor(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> isize {
        match self.0.get_descriptor(req, ct) {
            0 => self.1.get_descriptor(req, ct),
            n => n,
        }
    }

    fn setup(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> bool {
        self.0.setup(req, ct) || self.1.setup(req, ct)
    }

    fn control_in_complete(&mut self, req: &ControlRequest) {
        self.0.control_in_complete(req);
        self.1.control_in_complete(req);
    }

    fn for_each_endpoint(&self, f: &mut dyn FnMut(&EndpointSpec)) {
        self.0.for_each_endpoint(f);
        self.1.for_each_endpoint(f);
    }

    fn reset(&mut self) {
        self.0.reset();
        self.1.reset();
    }
}

impl<T: ClassDriver> ClassDriver for [T] {
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize {
        self.iter_mut()
            .map(|d| d.get_interface(interface_count, ct))
            .sum()
    }

    fn get_descriptor(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> isize {
        self.iter_mut()
            .map(|d| d.get_descriptor(req, ct))
            .find(|&n| n != 0)
            .unwrap_or(0)
    }

    fn setup(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> bool {
        self.iter_mut().any(|d| d.setup(req, ct))
    }

    fn control_in_complete(&mut self, req: &ControlRequest) {
        for d in self.iter_mut() {
            d.control_in_complete(req);
        }
    }

    fn for_each_endpoint(&self, f: &mut dyn FnMut(&EndpointSpec)) {
        for d in self.iter() {
            d.for_each_endpoint(f);
        }
    }

    fn reset(&mut self) {
        for d in self.iter_mut() {
            d.reset();
        }
    }
}

impl<T: ClassDriver, const N: usize> ClassDriver for [T; N] {
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize {
        self.as_mut_slice().get_interface(interface_count, ct)
    }

    fn get_descriptor(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> isize {
        self.as_mut_slice().get_descriptor(req, ct)
    }

    fn setup(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> bool {
        self.as_mut_slice().setup(req, ct)
    }

    fn control_in_complete(&mut self, req: &ControlRequest) {
        self.as_mut_slice().control_in_complete(req)
    }

    fn for_each_endpoint(&self, f: &mut dyn FnMut(&EndpointSpec)) {
        self.as_slice().for_each_endpoint(f)
    }

    fn reset(&mut self) {
        self.as_mut_slice().reset()
    }
}
