// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CDC ACM, the virtual serial port.
//!
//! The function is two interfaces tied together by an interface association
//! descriptor: a communication interface with one interrupt IN endpoint for
//! notifications (which we never send), and a data interface with a bulk
//! endpoint in each direction that carries the byte stream.
//!
//! The host configures the "line" with class requests on the communication
//! interface. None of it affects how bytes move; we just remember what the
//! host said so the application can look. The one exception is DTR, which
//! terminal programs raise when they open the port: writes are refused while
//! it's clear, since nothing would read them.

use byteorder::LittleEndian;
use log::{debug, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16, U32};

use crate::class::ClassDriver;
use crate::control::{ControlTransfer, TransferFlags};
use crate::hal::EndpointSpec;
use crate::usb::{
    le16, le32, ControlRequest, UsbDescType, UsbDir, UsbEndpointDescriptor,
    UsbInterfaceAssociationDescriptor, UsbInterfaceDescriptor, UsbTransferType,
    REQUEST_DEVICETOHOST_CLASS_INTERFACE, REQUEST_HOSTTODEVICE_CLASS_INTERFACE,
};
use crate::EP_SIZE;

const CDC_COMMUNICATION_CLASS: u8 = 0x02;
const CDC_ABSTRACT_CONTROL_MODEL: u8 = 0x02;
const CDC_DATA_CLASS: u8 = 0x0A;

const CDC_HEADER: u8 = 0x00;
const CDC_CALL_MANAGEMENT: u8 = 0x01;
const CDC_ABSTRACT_CONTROL_MANAGEMENT: u8 = 0x02;
const CDC_UNION: u8 = 0x06;

/// ACM capabilities: line coding and serial state requests, plus
/// SEND_BREAK.
const ACM_CAPABILITIES: u8 = 0x06;

const NOTIFY_PACKET_SIZE: u16 = 0x10;
const NOTIFY_INTERVAL: u8 = 0x40;

/// Control line state bits.
pub const LINE_STATE_DTR: u8 = 1 << 0;
pub const LINE_STATE_RTS: u8 = 1 << 1;

/// `SEND_BREAK` duration meaning "until told otherwise".
pub const BREAK_INDEFINITE: u16 = 0xFFFF;

/// The baud rate that, combined with dropping DTR, asks the device to
/// reboot into its bootloader.
pub const TOUCH_BAUD: u32 = 1200;

/// PSTN subclass requests we answer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum CdcRequest {
    SetLineCoding = 0x20,
    GetLineCoding = 0x21,
    SetControlLineState = 0x22,
    SendBreak = 0x23,
}

/// Serial parameters as the host sees them. Exactly the 7-byte wire layout
/// of `SET_LINE_CODING` / `GET_LINE_CODING`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct LineCoding {
    /// Bits per second.
    pub dte_rate: U32<LittleEndian>,
    /// 0 = 1 stop bit, 1 = 1.5, 2 = 2.
    pub char_format: u8,
    /// 0 = none, 1 = odd, 2 = even, 3 = mark, 4 = space.
    pub parity_type: u8,
    pub data_bits: u8,
}

impl LineCoding {
    pub const LEN: usize = core::mem::size_of::<Self>();

    pub const fn new(rate: u32, char_format: u8, parity_type: u8, data_bits: u8) -> Self {
        Self {
            dte_rate: le32(rate),
            char_format,
            parity_type,
            data_bits,
        }
    }

    pub fn rate(&self) -> u32 {
        self.dte_rate.get()
    }
}

impl Default for LineCoding {
    fn default() -> Self {
        Self::new(57600, 0, 0, 8)
    }
}

/// Class-specific interface descriptor: the CDC header.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, Unaligned)]
struct CdcHeaderDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    subtype: u8,
    bcd_cdc: U16<LittleEndian>,
}

/// A two-argument functional descriptor (call management, union).
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, Unaligned)]
struct CdcFunctionalDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    subtype: u8,
    arg0: u8,
    arg1: u8,
}

impl CdcFunctionalDescriptor {
    const fn new(subtype: u8, arg0: u8, arg1: u8) -> Self {
        Self {
            length: core::mem::size_of::<Self>() as u8,
            descriptor_type: UsbDescType::CsInterface,
            subtype,
            arg0,
            arg1,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, Unaligned)]
struct CdcAcmFunctionalDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    subtype: u8,
    capabilities: u8,
}

/// Everything the function contributes to the configuration descriptor,
/// in order.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, Unaligned)]
struct CdcAcmDescriptors {
    association: UsbInterfaceAssociationDescriptor,
    comm_interface: UsbInterfaceDescriptor,
    header: CdcHeaderDescriptor,
    call_management: CdcFunctionalDescriptor,
    acm: CdcAcmFunctionalDescriptor,
    union: CdcFunctionalDescriptor,
    notify_endpoint: UsbEndpointDescriptor,
    data_interface: UsbInterfaceDescriptor,
    out_endpoint: UsbEndpointDescriptor,
    in_endpoint: UsbEndpointDescriptor,
}

impl CdcAcmDescriptors {
    const fn new(acm_interface: u8, notify_ep: u8, out_ep: u8, in_ep: u8) -> Self {
        let data_interface = acm_interface + 1;
        Self {
            association: UsbInterfaceAssociationDescriptor::new(
                acm_interface,
                2,
                CDC_COMMUNICATION_CLASS,
                CDC_ABSTRACT_CONTROL_MODEL,
                0,
            ),
            comm_interface: UsbInterfaceDescriptor::new(
                acm_interface,
                1,
                CDC_COMMUNICATION_CLASS,
                CDC_ABSTRACT_CONTROL_MODEL,
                0,
            ),
            header: CdcHeaderDescriptor {
                length: core::mem::size_of::<CdcHeaderDescriptor>() as u8,
                descriptor_type: UsbDescType::CsInterface,
                subtype: CDC_HEADER,
                // CDC 1.10
                bcd_cdc: le16(0x0110),
            },
            // The device doesn't do call management itself.
            call_management: CdcFunctionalDescriptor::new(CDC_CALL_MANAGEMENT, 1, data_interface),
            acm: CdcAcmFunctionalDescriptor {
                length: core::mem::size_of::<CdcAcmFunctionalDescriptor>() as u8,
                descriptor_type: UsbDescType::CsInterface,
                subtype: CDC_ABSTRACT_CONTROL_MANAGEMENT,
                capabilities: ACM_CAPABILITIES,
            },
            union: CdcFunctionalDescriptor::new(CDC_UNION, acm_interface, data_interface),
            notify_endpoint: UsbEndpointDescriptor::new(
                UsbDir::In.endpoint(notify_ep),
                UsbTransferType::Interrupt,
                NOTIFY_PACKET_SIZE,
                NOTIFY_INTERVAL,
            ),
            data_interface: UsbInterfaceDescriptor::new(data_interface, 2, CDC_DATA_CLASS, 0, 0),
            out_endpoint: UsbEndpointDescriptor::new(
                UsbDir::Out.endpoint(out_ep),
                UsbTransferType::Bulk,
                EP_SIZE as u16,
                0,
            ),
            in_endpoint: UsbEndpointDescriptor::new(
                UsbDir::In.endpoint(in_ep),
                UsbTransferType::Bulk,
                EP_SIZE as u16,
                0,
            ),
        }
    }
}

/// CDC ACM class driver state.
///
/// Occupies two consecutive interfaces (numbered when the configuration
/// descriptor is built) and three consecutive endpoints starting at the one
/// given to `new`: interrupt IN, bulk OUT, bulk IN.
#[derive(Debug)]
pub struct CdcAcm {
    acm_interface: u8,
    notify_endpoint: u8,
    line_coding: LineCoding,
    line_state: u8,
    break_value: Option<u16>,
    touch_armed: bool,
    touch: bool,
    peek: Option<u8>,
    write_error: bool,
}

impl CdcAcm {
    pub fn new(first_endpoint: u8) -> Self {
        Self {
            acm_interface: 0,
            notify_endpoint: first_endpoint,
            line_coding: LineCoding::default(),
            line_state: 0,
            break_value: None,
            touch_armed: false,
            touch: false,
            peek: None,
            write_error: false,
        }
    }

    pub fn acm_interface(&self) -> u8 {
        self.acm_interface
    }

    pub fn notify_endpoint(&self) -> u8 {
        self.notify_endpoint
    }

    /// Bulk OUT, host to device.
    pub fn out_endpoint(&self) -> u8 {
        self.notify_endpoint + 1
    }

    /// Bulk IN, device to host.
    pub fn in_endpoint(&self) -> u8 {
        self.notify_endpoint + 2
    }

    pub fn line_coding(&self) -> LineCoding {
        self.line_coding
    }

    pub fn line_state(&self) -> u8 {
        self.line_state
    }

    pub fn dtr(&self) -> bool {
        self.line_state & LINE_STATE_DTR != 0
    }

    pub fn rts(&self) -> bool {
        self.line_state & LINE_STATE_RTS != 0
    }

    /// Whether a host has the port open.
    pub fn connected(&self) -> bool {
        self.line_state > 0
    }

    /// Returns the most recent break duration and forgets it.
    pub fn take_break(&mut self) -> Option<u16> {
        self.break_value.take()
    }

    /// Whether the host has done the 1200 baud touch since the last call.
    pub fn touch_requested(&mut self) -> bool {
        core::mem::take(&mut self.touch)
    }

    pub fn peeked(&self) -> Option<u8> {
        self.peek
    }

    pub fn set_peeked(&mut self, octet: Option<u8>) {
        self.peek = octet;
    }

    pub fn write_error(&self) -> bool {
        self.write_error
    }

    pub fn set_write_error(&mut self) {
        self.write_error = true;
    }

    pub fn clear_write_error(&mut self) {
        self.write_error = false;
    }

    fn set_line_coding(&mut self, ct: &mut ControlTransfer) -> bool {
        let mut raw = [0; LineCoding::LEN];
        if ct.recv(&mut raw) != raw.len() {
            return false;
        }
        match LineCoding::read_from(&raw[..]) {
            Some(lc) => {
                debug!("cdc: line coding {} {}{}{}", lc.rate(), lc.data_bits, lc.parity_type, lc.char_format);
                self.line_coding = lc;
                true
            }
            None => false,
        }
    }

    fn set_control_line_state(&mut self, state: u8) {
        debug!("cdc: line state {:#04x}", state);
        let dropped = self.dtr() && state & LINE_STATE_DTR == 0;
        self.line_state = state;
        // Acted on after the status stage, so the host sees the request
        // complete first.
        self.touch_armed = dropped && self.line_coding.rate() == TOUCH_BAUD;
    }
}

impl ClassDriver for CdcAcm {
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize {
        self.acm_interface = *interface_count;
        *interface_count += 2;
        let desc = CdcAcmDescriptors::new(
            self.acm_interface,
            self.notify_endpoint,
            self.out_endpoint(),
            self.in_endpoint(),
        );
        ct.send(TransferFlags::NONE, desc.as_bytes())
    }

    fn setup(&mut self, req: &ControlRequest, ct: &mut ControlTransfer) -> bool {
        if req.index() != u16::from(self.acm_interface) {
            return false;
        }
        let code = match CdcRequest::from_u8(req.request) {
            Some(c) => c,
            None => return false,
        };
        match (req.request_type, code) {
            (REQUEST_DEVICETOHOST_CLASS_INTERFACE, CdcRequest::GetLineCoding) => {
                ct.send(TransferFlags::RELEASE, self.line_coding.as_bytes());
                true
            }
            (REQUEST_HOSTTODEVICE_CLASS_INTERFACE, CdcRequest::SetLineCoding) => {
                if usize::from(req.length()) != LineCoding::LEN {
                    warn!("cdc: SET_LINE_CODING with {} bytes", req.length());
                    return false;
                }
                self.set_line_coding(ct)
            }
            (REQUEST_HOSTTODEVICE_CLASS_INTERFACE, CdcRequest::SetControlLineState) => {
                self.set_control_line_state(req.value_low());
                true
            }
            (REQUEST_HOSTTODEVICE_CLASS_INTERFACE, CdcRequest::SendBreak) => {
                debug!("cdc: break {}", req.value());
                self.break_value = Some(req.value());
                true
            }
            _ => false,
        }
    }

    fn control_in_complete(&mut self, req: &ControlRequest) {
        if req.request != CdcRequest::SetControlLineState as u8 {
            return;
        }
        if core::mem::take(&mut self.touch_armed) {
            debug!("cdc: 1200 baud touch");
            self.touch = true;
        }
    }

    fn for_each_endpoint(&self, f: &mut dyn FnMut(&EndpointSpec)) {
        f(&EndpointSpec::new(
            UsbDir::In.endpoint(self.notify_endpoint),
            UsbTransferType::Interrupt,
            NOTIFY_PACKET_SIZE,
        ));
        f(&EndpointSpec::new(
            UsbDir::Out.endpoint(self.out_endpoint()),
            UsbTransferType::Bulk,
            EP_SIZE as u16,
        ));
        f(&EndpointSpec::new(
            UsbDir::In.endpoint(self.in_endpoint()),
            UsbTransferType::Bulk,
            EP_SIZE as u16,
        ));
    }

    fn reset(&mut self) {
        self.line_state = 0;
        self.break_value = None;
        self.touch_armed = false;
        self.peek = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_out(request: CdcRequest, value: u16, index: u16, payload: &[u8]) -> ControlRequest {
        ControlRequest::new(
            REQUEST_HOSTTODEVICE_CLASS_INTERFACE,
            request as u8,
            value,
            index,
            payload.len() as u16,
        )
    }

    /// Runs a request the way the engine does: payload first, then setup.
    fn run(cdc: &mut CdcAcm, req: ControlRequest, payload: &[u8]) -> (bool, Vec<u8>) {
        let mut ct = ControlTransfer::new();
        ct.begin(req);
        if !payload.is_empty() {
            ct.expect_out(payload.len());
            ct.accept_out(payload);
        }
        let ok = cdc.setup(&req, &mut ct);
        (ok, ct.written().to_vec())
    }

    fn get_line_coding(cdc: &mut CdcAcm) -> Vec<u8> {
        let req = ControlRequest::new(
            REQUEST_DEVICETOHOST_CLASS_INTERFACE,
            CdcRequest::GetLineCoding as u8,
            0,
            0,
            7,
        );
        let (ok, reply) = run(cdc, req, &[]);
        assert!(ok);
        reply
    }

    #[test]
    fn descriptor_set_is_66_bytes() {
        assert_eq!(core::mem::size_of::<CdcAcmDescriptors>(), 66);
    }

    #[test]
    fn interfaces_are_numbered_from_the_counter() {
        let mut cdc = CdcAcm::new(1);
        let mut ct = ControlTransfer::new();
        ct.start(128);
        let mut count = 3;
        assert_eq!(cdc.get_interface(&mut count, &mut ct), 66);
        assert_eq!(count, 5);
        assert_eq!(cdc.acm_interface(), 3);
        let d = ct.written();
        // IAD first interface, comm interface number, union master/slave.
        assert_eq!(d[2], 3);
        assert_eq!(d[8 + 2], 3);
        assert_eq!(&d[8 + 9 + 5 + 5 + 4 + 3..][..2], &[3, 4]);
        // Bulk IN is the last descriptor.
        assert_eq!(&d[59..][..4], &[7, 5, 0x83, 2]);
    }

    #[test]
    fn line_coding_round_trip() {
        let mut cdc = CdcAcm::new(1);
        let lc = LineCoding::new(115200, 0, 0, 8);
        let (ok, _) = run(&mut cdc, class_out(CdcRequest::SetLineCoding, 0, 0, lc.as_bytes()), lc.as_bytes());
        assert!(ok);
        assert_eq!(get_line_coding(&mut cdc), lc.as_bytes());
    }

    #[test]
    fn short_line_coding_is_rejected() {
        let mut cdc = CdcAcm::new(1);
        let before = get_line_coding(&mut cdc);
        let payload = [0x00, 0xc2, 0x01, 0x00, 0, 0];
        let (ok, _) = run(&mut cdc, class_out(CdcRequest::SetLineCoding, 0, 0, &payload), &payload);
        assert!(!ok);
        assert_eq!(get_line_coding(&mut cdc), before);
    }

    #[test]
    fn other_interfaces_are_ignored() {
        let mut cdc = CdcAcm::new(1);
        let (ok, _) = run(&mut cdc, class_out(CdcRequest::SetControlLineState, 3, 1, &[]), &[]);
        assert!(!ok);
        assert!(!cdc.connected());
    }

    #[test]
    fn line_state_and_break() {
        let mut cdc = CdcAcm::new(1);
        run(&mut cdc, class_out(CdcRequest::SetControlLineState, 3, 0, &[]), &[]);
        assert!(cdc.dtr() && cdc.rts() && cdc.connected());

        run(&mut cdc, class_out(CdcRequest::SendBreak, BREAK_INDEFINITE, 0, &[]), &[]);
        assert_eq!(cdc.take_break(), Some(BREAK_INDEFINITE));
        assert_eq!(cdc.take_break(), None);
    }

    #[test]
    fn touch_fires_after_status_stage() {
        let mut cdc = CdcAcm::new(1);
        let lc = LineCoding::new(TOUCH_BAUD, 0, 0, 8);
        run(&mut cdc, class_out(CdcRequest::SetLineCoding, 0, 0, lc.as_bytes()), lc.as_bytes());
        let raise = class_out(CdcRequest::SetControlLineState, 1, 0, &[]);
        run(&mut cdc, raise, &[]);
        cdc.control_in_complete(&raise);
        assert!(!cdc.touch_requested());

        let drop = class_out(CdcRequest::SetControlLineState, 0, 0, &[]);
        run(&mut cdc, drop, &[]);
        assert!(!cdc.touch_requested());
        cdc.control_in_complete(&drop);
        assert!(cdc.touch_requested());
        assert!(!cdc.touch_requested());
    }

    #[test]
    fn touch_waits_for_its_own_status_stage() {
        let mut cdc = CdcAcm::new(1);
        let lc = LineCoding::new(TOUCH_BAUD, 0, 0, 8);
        run(&mut cdc, class_out(CdcRequest::SetLineCoding, 0, 0, lc.as_bytes()), lc.as_bytes());
        run(&mut cdc, class_out(CdcRequest::SetControlLineState, 1, 0, &[]), &[]);
        run(&mut cdc, class_out(CdcRequest::SetControlLineState, 0, 0, &[]), &[]);

        // Some other transfer finishing doesn't count.
        let read = ControlRequest::new(0xA1, CdcRequest::GetLineCoding as u8, 0, 0, 7);
        cdc.control_in_complete(&read);
        assert!(!cdc.touch_requested());

        // Nor does a drop that was superseded before its status stage.
        let raise = class_out(CdcRequest::SetControlLineState, 1, 0, &[]);
        run(&mut cdc, raise, &[]);
        cdc.control_in_complete(&raise);
        assert!(!cdc.touch_requested());
    }

    #[test]
    fn unknown_class_request_is_not_handled() {
        let mut cdc = CdcAcm::new(1);
        let req = ControlRequest::new(REQUEST_HOSTTODEVICE_CLASS_INTERFACE, 0x42, 0, 0, 0);
        assert!(!run(&mut cdc, req, &[]).0);
    }
}
