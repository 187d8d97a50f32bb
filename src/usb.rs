// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB 2.0 Chapter 9 structures and constants.
//!
//! Everything in here has a fixed on-the-wire layout. The structs are
//! `repr(C)` and built only from bytes and little-endian `zerocopy` integers,
//! so they have no padding, no alignment requirement, and can be turned into
//! bytes with `AsBytes::as_bytes` (or parsed with `FromBytes::read_from`)
//! without any copying or hand-written shifting.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16, U32};

/// A SETUP packet is always exactly this long.
pub const SETUP_PACKET_LEN: usize = 8;

/// `bmRequestType` for a class request sent from the device to the host,
/// addressed to an interface.
pub const REQUEST_DEVICETOHOST_CLASS_INTERFACE: u8 = 0xA1;
/// `bmRequestType` for a class request sent from the host to the device,
/// addressed to an interface.
pub const REQUEST_HOSTTODEVICE_CLASS_INTERFACE: u8 = 0x21;

/// Builds a little-endian 16-bit field in a `const` context.
pub const fn le16(v: u16) -> U16<LittleEndian> {
    U16::from_bytes(v.to_le_bytes())
}

/// Builds a little-endian 32-bit field in a `const` context.
pub const fn le32(v: u32) -> U32<LittleEndian> {
    U32::from_bytes(v.to_le_bytes())
}

/// USB deals in two transfer directions, OUT (host-to-device) and IN
/// (device-to-host). In endpoint addresses and in `bmRequestType` both are
/// encoded in bit 7.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    /// Produces the endpoint address for endpoint `num` in this direction.
    pub const fn endpoint(self, num: u8) -> u8 {
        num | self as u8
    }

    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Strips the direction bit from an endpoint address.
pub const fn endpoint_number(addr: u8) -> u8 {
    addr & 0x0F
}

/// Bits 6..5 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Bits 4..0 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

/// The 8-byte SETUP packet that opens every control transfer.
///
/// Captured once per transfer and never modified afterwards.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct ControlRequest {
    /// Direction, kind, and recipient bitfield.
    pub request_type: u8,
    /// Request code. Standard codes are in `UsbSetupRequest`; classes define
    /// their own in the same space, distinguished by `request_type`.
    pub request: u8,
    /// Request-specific argument.
    pub value: U16<LittleEndian>,
    /// Request-specific argument, usually an interface or endpoint number.
    pub index: U16<LittleEndian>,
    /// Number of bytes in the data stage: exact for OUT, a maximum for IN.
    pub length: U16<LittleEndian>,
}

impl ControlRequest {
    pub const fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value: le16(value),
            index: le16(index),
            length: le16(length),
        }
    }

    /// Reinterprets raw SETUP bytes. Anything other than exactly
    /// `SETUP_PACKET_LEN` bytes is rejected.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from(bytes)
    }

    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }

    pub fn value(&self) -> u16 {
        self.value.get()
    }

    pub fn value_low(&self) -> u8 {
        self.value.get() as u8
    }

    pub fn value_high(&self) -> u8 {
        (self.value.get() >> 8) as u8
    }

    pub fn index(&self) -> u16 {
        self.index.get()
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }

    /// True for host-to-device requests that carry a data stage.
    pub fn is_control_write(&self) -> bool {
        self.direction() == UsbDir::Out && self.length() != 0
    }
}

/// Standard request codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbSetupRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

/// Feature selectors for `SetFeature` / `ClearFeature`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbFeature {
    EndpointHalt = 0,
    DeviceRemoteWakeup = 1,
    TestMode = 2,
}

/// Types of USB descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes, Unaligned)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    OtherSpeedConfig = 0x07,
    InterfacePower = 0x08,
    InterfaceAssociation = 0x0B,
    CsInterface = 0x24,
    CsEndpoint = 0x25,
}

/// Transfer types, as encoded in the bottom two bits of an endpoint
/// descriptor's `attributes`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes, Unaligned)]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Bulk = 2,
    Interrupt = 3,
}

/// Describes the device as a whole. Sent first during enumeration.
#[repr(C)]
#[derive(Debug, AsBytes, Unaligned)]
pub struct UsbDeviceDescriptor {
    /// Always 18.
    pub length: u8,
    pub descriptor_type: UsbDescType,
    /// USB release in binary-coded decimal, e.g. `0x0200`.
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Packet size of endpoint 0.
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// Device release, BCD.
    pub bcd_device: U16<LittleEndian>,
    /// String descriptor indices; 0 means "no string".
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    pub num_configurations: u8,
}

/// Header of the configuration descriptor. The interface, functional, and
/// endpoint descriptors of every class driver follow it in the same transfer,
/// and `total_length` covers all of them.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, Unaligned)]
pub struct UsbConfigurationDescriptor {
    /// Always 9.
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// Value the host passes to `SetConfiguration` to select this one.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// Bit 7 must be set; bit 6 is self-powered; bit 5 is remote wakeup.
    pub attributes: u8,
    /// Units of 2 mA.
    pub max_power: u8,
}

impl UsbConfigurationDescriptor {
    pub const LEN: usize = core::mem::size_of::<Self>();
}

/// Groups consecutive interfaces into one function, so that the host binds
/// a single class driver (here, CDC ACM) to both of them.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, Unaligned)]
pub struct UsbInterfaceAssociationDescriptor {
    /// Always 8.
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub first_interface: u8,
    pub interface_count: u8,
    pub function_class: u8,
    pub function_subclass: u8,
    pub function_protocol: u8,
    pub function_s: u8,
}

impl UsbInterfaceAssociationDescriptor {
    pub const fn new(
        first_interface: u8,
        interface_count: u8,
        class: u8,
        subclass: u8,
        protocol: u8,
    ) -> Self {
        Self {
            length: core::mem::size_of::<Self>() as u8,
            descriptor_type: UsbDescType::InterfaceAssociation,
            first_interface,
            interface_count,
            function_class: class,
            function_subclass: subclass,
            function_protocol: protocol,
            function_s: 0,
        }
    }
}

/// One interface within a configuration.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, Unaligned)]
pub struct UsbInterfaceDescriptor {
    /// Always 9.
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub interface_number: u8,
    /// Normally zero; alternates of the same interface count up from here.
    pub alternate_setting: u8,
    /// Endpoint descriptors that follow, not counting endpoint 0.
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

impl UsbInterfaceDescriptor {
    pub const fn new(number: u8, num_endpoints: u8, class: u8, subclass: u8, protocol: u8) -> Self {
        Self {
            length: core::mem::size_of::<Self>() as u8,
            descriptor_type: UsbDescType::Interface,
            interface_number: number,
            alternate_setting: 0,
            num_endpoints,
            interface_class: class,
            interface_subclass: subclass,
            interface_protocol: protocol,
            interface_s: 0,
        }
    }
}

/// One endpoint within an interface.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, Unaligned)]
pub struct UsbEndpointDescriptor {
    /// Always 7.
    pub length: u8,
    pub descriptor_type: UsbDescType,
    /// Endpoint number in bits 3..0, direction in bit 7.
    pub endpoint_address: u8,
    /// Transfer type in bits 1..0, see `UsbTransferType`.
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    /// Polling interval for interrupt endpoints, in frames (milliseconds at
    /// full speed). Ignored for bulk.
    pub interval: u8,
}

impl UsbEndpointDescriptor {
    pub const fn new(address: u8, ty: UsbTransferType, max_packet_size: u16, interval: u8) -> Self {
        Self {
            length: core::mem::size_of::<Self>() as u8,
            descriptor_type: UsbDescType::Endpoint,
            endpoint_address: address,
            attributes: ty as u8,
            max_packet_size: le16(max_packet_size),
            interval,
        }
    }
}
