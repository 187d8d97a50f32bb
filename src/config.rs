// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity and descriptor assembly.
//!
//! The device and string descriptors come straight out of `DeviceConfig`.
//! The configuration descriptor is harder: its 9-byte header has to state
//! the total length and interface count of everything after it, and those
//! are only known by asking the class drivers. `ConfigurationBuilder` asks
//! twice. The first pass runs every driver's `get_interface` against a
//! zero-byte budget, so nothing is stored but `send` still reports each
//! length; the header is then written with those totals, and the second pass
//! runs the same drivers again for real.

use log::{debug, warn};
use zerocopy::AsBytes;

use crate::class::ClassDriver;
use crate::control::{ControlTransfer, TransferFlags};
use crate::usb::{le16, UsbConfigurationDescriptor, UsbDescType, UsbDeviceDescriptor};
use crate::{CTL_BUFFER_SIZE, EP0_SIZE};

/// US English, the only language we offer.
const LANGID_EN_US: u16 = 0x0409;

/// The configuration number the host selects us with.
pub const CONFIGURATION_VALUE: u8 = 1;

/// Who the device says it is.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Device release, BCD.
    pub bcd_device: u16,
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial: Option<&'static str>,
    pub self_powered: bool,
    pub remote_wakeup: bool,
    /// Bus current draw. Rounded down to the descriptor's 2 mA units.
    pub max_power_ma: u16,
}

impl DeviceConfig {
    pub const fn new() -> Self {
        Self {
            // pid.codes test VID/PID.
            vendor_id: 0x1209,
            product_id: 0x0001,
            bcd_device: 0x0100,
            manufacturer: "Unknown",
            product: "USB Serial",
            serial: None,
            self_powered: false,
            remote_wakeup: false,
            max_power_ma: 500,
        }
    }

    pub const fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub const fn with_strings(
        mut self,
        manufacturer: &'static str,
        product: &'static str,
        serial: Option<&'static str>,
    ) -> Self {
        self.manufacturer = manufacturer;
        self.product = product;
        self.serial = serial;
        self
    }

    pub fn device_descriptor(&self) -> UsbDeviceDescriptor {
        UsbDeviceDescriptor {
            length: core::mem::size_of::<UsbDeviceDescriptor>() as u8,
            descriptor_type: UsbDescType::Device,
            bcd_usb: le16(0x0200),
            // Miscellaneous / common class / IAD, so the host reads the
            // interface association descriptors.
            device_class: 0xEF,
            device_subclass: 0x02,
            device_protocol: 0x01,
            max_packet_size0: EP0_SIZE as u8,
            vendor: le16(self.vendor_id),
            product: le16(self.product_id),
            bcd_device: le16(self.bcd_device),
            manufacturer_s: 1,
            product_s: 2,
            serial_s: if self.serial.is_some() { 3 } else { 0 },
            num_configurations: 1,
        }
    }

    /// `bmAttributes` for the configuration descriptor.
    pub fn attributes(&self) -> u8 {
        0x80 | (u8::from(self.self_powered) << 6) | (u8::from(self.remote_wakeup) << 5)
    }

    fn string(&self, index: u8) -> Option<&'static str> {
        match index {
            1 => Some(self.manufacturer),
            2 => Some(self.product),
            3 => self.serial,
            _ => None,
        }
    }

    /// Sends string descriptor `index` through `ct`, converting to UTF-16
    /// on the way. Returns false if there's no such string.
    pub fn send_string_descriptor(&self, index: u8, ct: &mut ControlTransfer) -> bool {
        if index == 0 {
            let mut langs = [4, UsbDescType::String as u8, 0, 0];
            langs[2..].copy_from_slice(&LANGID_EN_US.to_le_bytes());
            ct.send(TransferFlags::RELEASE, &langs);
            return true;
        }
        let s = match self.string(index) {
            Some(s) => s,
            None => return false,
        };
        // bLength is a byte; anything past 126 code units is cut off.
        let units = s.encode_utf16().count().min(126);
        ct.send(TransferFlags::NONE, &[(2 + 2 * units) as u8, UsbDescType::String as u8]);
        for unit in s.encode_utf16().take(units) {
            ct.send(TransferFlags::NONE, &unit.to_le_bytes());
        }
        true
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the most recently assembled configuration descriptor.
pub struct ConfigurationBuilder {
    desc: [u8; CTL_BUFFER_SIZE],
    len: usize,
    total_length: u16,
    interfaces: u8,
}

impl ConfigurationBuilder {
    pub const fn new() -> Self {
        Self {
            desc: [0; CTL_BUFFER_SIZE],
            len: 0,
            total_length: 0,
            interfaces: 0,
        }
    }

    /// Assembles the configuration descriptor for `drivers`, using `ct` as
    /// scratch. Anything in flight on endpoint 0 is lost, so this only runs
    /// at startup and on bus reset.
    pub fn build(
        &mut self,
        config: &DeviceConfig,
        drivers: &mut (impl ClassDriver + ?Sized),
        ct: &mut ControlTransfer,
    ) {
        // Measure.
        ct.start(0);
        let mut interfaces = 0;
        let measured = drivers.get_interface(&mut interfaces, ct);

        let total = UsbConfigurationDescriptor::LEN + measured;
        let header = UsbConfigurationDescriptor {
            length: UsbConfigurationDescriptor::LEN as u8,
            descriptor_type: UsbDescType::Config as u8,
            total_length: le16(total as u16),
            num_interfaces: interfaces,
            configuration_value: CONFIGURATION_VALUE,
            configuration_s: 0,
            attributes: config.attributes(),
            max_power: (config.max_power_ma / 2).min(u16::from(u8::MAX)) as u8,
        };

        // Emit.
        ct.start(CTL_BUFFER_SIZE);
        ct.send(TransferFlags::NONE, header.as_bytes());
        let mut emitted_interfaces = 0;
        let emitted = drivers.get_interface(&mut emitted_interfaces, ct);

        if emitted != measured || emitted_interfaces != interfaces {
            warn!(
                "config descriptor: measured {} bytes/{} interfaces, emitted {}/{}",
                measured, interfaces, emitted, emitted_interfaces
            );
        }
        let written = ct.written();
        if written.len() < total {
            warn!("config descriptor truncated to {} of {} bytes", written.len(), total);
        }
        self.desc[..written.len()].copy_from_slice(written);
        self.len = written.len();
        self.total_length = total as u16;
        self.interfaces = interfaces;
        debug!("config descriptor: {} bytes, {} interfaces", total, interfaces);
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.desc[..self.len]
    }

    /// `wTotalLength` as written into the header.
    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    /// Whether the whole descriptor fit in the buffer. If not, the host
    /// can't be given a consistent one and the core refuses to send it.
    pub fn is_complete(&self) -> bool {
        self.len == usize::from(self.total_length)
    }

    pub fn interfaces(&self) -> u8 {
        self.interfaces
    }
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::{ControlRequest, UsbDir, UsbSetupRequest};
    use zerocopy::FromBytes;

    /// Counts its calls, so both passes are visible.
    struct Probe {
        calls: u32,
    }

    impl ClassDriver for Probe {
        fn get_interface(&mut self, count: &mut u8, ct: &mut ControlTransfer) -> usize {
            self.calls += 1;
            *count += 1;
            ct.send(TransferFlags::NONE, &[9, 4, 0, 0, 0, 0xff, 0, 0, 0])
        }

        fn setup(&mut self, _: &ControlRequest, _: &mut ControlTransfer) -> bool {
            false
        }
    }

    fn string_request(index: u8) -> ControlRequest {
        ControlRequest::new(
            UsbDir::In as u8,
            UsbSetupRequest::GetDescriptor as u8,
            u16::from(UsbDescType::String as u8) << 8 | u16::from(index),
            LANGID_EN_US,
            255,
        )
    }

    #[test]
    fn header_reflects_measure_pass() {
        let mut probe = Probe { calls: 0 };
        let mut b = ConfigurationBuilder::new();
        let mut ct = ControlTransfer::new();
        b.build(&DeviceConfig::new(), &mut probe, &mut ct);

        assert_eq!(probe.calls, 2);
        assert_eq!(b.descriptor().len(), 18);
        let header = UsbConfigurationDescriptor::read_from(&b.descriptor()[..9]).unwrap();
        assert_eq!(header.total_length.get(), 18);
        assert_eq!(header.num_interfaces, 1);
        assert_eq!(header.attributes, 0x80);
        assert_eq!(header.max_power, 250);
    }

    #[test]
    fn attributes_follow_config() {
        let mut c = DeviceConfig::new();
        c.self_powered = true;
        c.remote_wakeup = true;
        assert_eq!(c.attributes(), 0xE0);
    }

    #[test]
    fn device_descriptor_fields() {
        let d = DeviceConfig::new().with_ids(0x2e8a, 0x000a).device_descriptor();
        let bytes = d.as_bytes();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[8..12], &[0x8a, 0x2e, 0x0a, 0x00]);
        assert_eq!(d.serial_s, 0);
    }

    #[test]
    fn strings_are_utf16() {
        let config = DeviceConfig::new().with_strings("Acme", "Ü", Some("42"));
        let mut ct = ControlTransfer::new();

        ct.begin(string_request(0));
        assert!(config.send_string_descriptor(0, &mut ct));
        assert_eq!(ct.written(), &[4, 3, 0x09, 0x04]);

        ct.begin(string_request(2));
        assert!(config.send_string_descriptor(2, &mut ct));
        assert_eq!(ct.written(), &[4, 3, 0xdc, 0x00]);

        ct.begin(string_request(3));
        assert!(config.send_string_descriptor(3, &mut ct));
        assert_eq!(ct.written(), &[6, 3, b'4', 0, b'2', 0]);

        ct.begin(string_request(4));
        assert!(!config.send_string_descriptor(4, &mut ct));
    }
}
