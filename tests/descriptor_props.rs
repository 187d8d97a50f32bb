// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The configuration descriptor's measured and emitted lengths agree for
//! any collection of drivers.

use proptest::prelude::*;
use usb_acm_core::config::ConfigurationBuilder;
use usb_acm_core::control::{ControlTransfer, TransferFlags};
use usb_acm_core::usb::ControlRequest;
use usb_acm_core::{CdcAcm, ClassDriver, DeviceConfig, CTL_BUFFER_SIZE};

/// Emits `bytes` bytes in pieces of `piece`, claiming `interfaces`
/// interfaces.
#[derive(Clone, Debug)]
struct Blob {
    interfaces: u8,
    bytes: usize,
    piece: usize,
    first_interface: Option<u8>,
}

impl ClassDriver for Blob {
    fn get_interface(&mut self, interface_count: &mut u8, ct: &mut ControlTransfer) -> usize {
        self.first_interface = Some(*interface_count);
        *interface_count += self.interfaces;
        let zeros = [0; 64];
        let mut sent = 0;
        while sent < self.bytes {
            let n = self.piece.min(self.bytes - sent);
            sent += ct.send(TransferFlags::ZERO, &zeros[..n]);
        }
        sent
    }

    fn setup(&mut self, _: &ControlRequest, _: &mut ControlTransfer) -> bool {
        false
    }
}

fn blob() -> impl Strategy<Value = Blob> {
    (0u8..4, 0usize..120, 1usize..64).prop_map(|(interfaces, bytes, piece)| Blob {
        interfaces,
        bytes,
        piece,
        first_interface: None,
    })
}

proptest! {
    #[test]
    fn measured_total_is_what_gets_emitted(mut blobs in prop::collection::vec(blob(), 0..6)) {
        let config = DeviceConfig::new();
        let mut builder = ConfigurationBuilder::new();
        let mut ct = ControlTransfer::new();
        builder.build(&config, &mut blobs[..], &mut ct);

        let body: usize = blobs.iter().map(|b| b.bytes).sum();
        let total = 9 + body;
        prop_assert_eq!(usize::from(builder.total_length()), total);
        let desc = builder.descriptor();
        prop_assert_eq!(desc.len(), total.min(CTL_BUFFER_SIZE));
        prop_assert_eq!(builder.is_complete(), total <= CTL_BUFFER_SIZE);
        prop_assert_eq!(usize::from(u16::from_le_bytes([desc[2], desc[3]])), total);

        let interfaces: u8 = blobs.iter().map(|b| b.interfaces).sum();
        prop_assert_eq!(builder.interfaces(), interfaces);
        prop_assert_eq!(desc[4], interfaces);

        // Numbered consecutively, in order.
        let mut next = 0;
        for b in &blobs {
            prop_assert_eq!(b.first_interface, Some(next));
            next += b.interfaces;
        }
    }

    #[test]
    fn cdc_plus_anything(mut extra in blob()) {
        let config = DeviceConfig::new();
        let mut builder = ConfigurationBuilder::new();
        let mut ct = ControlTransfer::new();
        let mut cdc = CdcAcm::new(1);
        let mut drivers = (&mut cdc, &mut extra);
        builder.build(&config, &mut drivers, &mut ct);

        prop_assert_eq!(usize::from(builder.total_length()), 75 + extra.bytes);
        prop_assert_eq!(builder.interfaces(), 2 + extra.interfaces);
        prop_assert_eq!(extra.first_interface, Some(2));
    }
}
