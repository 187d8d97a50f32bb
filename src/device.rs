// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device core.
//!
//! `UsbCore` owns everything USB: the peripheral (through `UsbHal`), the
//! data endpoint buffers, the endpoint 0 engine, the configuration
//! descriptor, the CDC ACM function, and any other class drivers. It
//! implements `TransactionHandler`, so the interrupt handler just feeds it
//! events, and after handling each one it passes the event on to `next`.
//!
//! # Control transfers
//!
//! Endpoint 0 runs the `ControlState` machine:
//!
//! - SETUP captures the request. Standard requests are answered here. Class
//!   and vendor requests go to the class drivers, except control writes
//!   (host-to-device with a data stage): for those the drivers are not asked
//!   yet. We arm endpoint 0 to receive the payload into the control buffer
//!   and move to `AwaitingDataOut`.
//! - When the payload has fully arrived the drivers' `setup` finally runs,
//!   and can `recv` the payload straight out of the buffer. Accepting sends
//!   the status ZLP; refusing stalls.
//! - Control reads go out one packet per IN completion. When the last one
//!   is collected the drivers hear about it through `control_in_complete`,
//!   and we arm endpoint 0 for the host's status packet.
//!
//! Anything malformed, unrecognized, or too big stalls endpoint 0 and
//! returns to `Idle`; the next SETUP clears the stall.
//!
//! # Sharing
//!
//! The interrupt handler and foreground code both need the core, so it
//! lives in an `IrqMutex`. Foreground code takes the lock for each
//! individual buffer operation, and the blocking `send` releases it between
//! attempts so the interrupt can make progress.

use log::{debug, trace, warn};
use num_traits::FromPrimitive;
use zerocopy::AsBytes;

use crate::buffer::{EndpointBuffer, EndpointBufferSet, EndpointIo};
use crate::cdc::CdcAcm;
use crate::class::ClassDriver;
use crate::config::{ConfigurationBuilder, DeviceConfig, CONFIGURATION_VALUE};
use crate::control::{ControlState, ControlTransfer, TransferFlags};
use crate::critical::{InterruptMask, IrqMutex};
use crate::error::{ControlError, Error};
use crate::hal::{EndpointSpec, TransactionHandler, UsbHal};
use crate::usb::{
    endpoint_number, ControlRequest, Recipient, RequestKind, UsbDescType, UsbDir, UsbFeature,
    UsbSetupRequest, SETUP_PACKET_LEN,
};
use crate::{CTL_BUFFER_SIZE, EP0_SIZE, EP_COUNT, EP_SIZE, SEND_TIMEOUT_MS};

pub type Buffers = EndpointBufferSet<EP_SIZE, EP_COUNT>;

/// Chapter 9 device states, minus `Attached`/`Powered`, which we can't
/// observe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Default,
    Addressed,
    Configured,
    Suspended,
}

/// Halted endpoints: bit `n` for OUT `n`, bit `16 + n` for IN `n`.
fn halt_bit(ep_addr: u8) -> u32 {
    let shift = match UsbDir::of_endpoint_addr(ep_addr) {
        UsbDir::Out => 0,
        UsbDir::In => 16,
    };
    1 << (shift + u32::from(endpoint_number(ep_addr)))
}

/// Adapts the HAL to what a buffer needs.
///
/// Touching a halted endpoint's buffer control would clear its stall, so
/// while the host has one halted nothing is written or armed there. The
/// buffer is left thinking the packet went out (or reception is armed),
/// which keeps it from trying again until `CLEAR_FEATURE` reinitializes it.
struct Port<'a, H> {
    hal: &'a mut H,
    online: bool,
    halted: u32,
}

impl<H: UsbHal> EndpointIo for Port<'_, H> {
    fn online(&self) -> bool {
        self.online
    }

    fn write_packet(&mut self, ep: u8, data: &[u8]) {
        if self.halted & halt_bit(UsbDir::In.endpoint(ep)) != 0 {
            trace!("ep{} halted, {} bytes dropped", ep, data.len());
            return;
        }
        self.hal.ep_write(ep, data);
    }

    fn arm_out(&mut self, ep: u8, max_len: usize) {
        if !self.online {
            trace!("ep{} not armed, not configured", ep);
            return;
        }
        if self.halted & halt_bit(UsbDir::Out.endpoint(ep)) != 0 {
            trace!("ep{} halted, not armed", ep);
            return;
        }
        self.hal.ep_rx_enable(ep, max_len);
    }
}

pub struct UsbCore<H: UsbHal, D: ClassDriver = (), N: TransactionHandler = ()> {
    hal: H,
    state: DeviceState,
    /// What to go back to on resume.
    resume_state: DeviceState,
    configuration: u8,
    remote_wakeup: bool,
    /// Set by SET_ADDRESS, applied once its status stage is done.
    pending_address: Option<u8>,
    /// See `halt_bit`.
    halted: u32,
    buffers: Buffers,
    control: ControlTransfer,
    builder: ConfigurationBuilder,
    config: DeviceConfig,
    cdc: CdcAcm,
    drivers: D,
    next: N,
}

impl<H: UsbHal, D: ClassDriver, N: TransactionHandler> UsbCore<H, D, N> {
    /// Puts the pieces together. `drivers` are the class drivers besides
    /// CDC ACM, which always comes first; `next` receives every
    /// transaction event after the core has handled it.
    pub fn new(hal: H, config: DeviceConfig, cdc: CdcAcm, drivers: D, next: N) -> Self {
        let mut core = Self {
            hal,
            state: DeviceState::Default,
            resume_state: DeviceState::Default,
            configuration: 0,
            remote_wakeup: false,
            pending_address: None,
            halted: 0,
            buffers: Buffers::new(),
            control: ControlTransfer::new(),
            builder: ConfigurationBuilder::new(),
            config,
            cdc,
            drivers,
            next,
        };
        core.rebuild_config_descriptor();
        core
    }

    /// Connects to the bus.
    pub fn start(&mut self) {
        debug!("usb: connect");
        self.hal.connect();
    }

    pub fn stop(&mut self) {
        debug!("usb: disconnect");
        self.hal.disconnect();
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn configured(&self) -> bool {
        self.configuration != 0
    }

    pub fn is_suspended(&self) -> bool {
        self.state == DeviceState::Suspended
    }

    pub fn remote_wakeup_enabled(&self) -> bool {
        self.remote_wakeup
    }

    pub fn control_state(&self) -> ControlState {
        self.control.state()
    }

    pub fn config_descriptor(&self) -> &[u8] {
        self.builder.descriptor()
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn cdc(&self) -> &CdcAcm {
        &self.cdc
    }

    pub fn cdc_mut(&mut self) -> &mut CdcAcm {
        &mut self.cdc
    }

    pub fn drivers_mut(&mut self) -> &mut D {
        &mut self.drivers
    }

    pub fn next_mut(&mut self) -> &mut N {
        &mut self.next
    }

    /// Whether IN data can reach the host at all.
    fn online(&self) -> bool {
        matches!(self.state, DeviceState::Configured | DeviceState::Suspended)
    }

    fn with_buffer<R>(
        &mut self,
        ep: u8,
        f: impl FnOnce(&mut EndpointBuffer<EP_SIZE>, &mut Port<'_, H>) -> R,
    ) -> Result<R, Error> {
        let ep = endpoint_number(ep);
        if ep == 0 {
            return Err(Error::ControlEndpoint);
        }
        let online = self.online();
        let buf = self.buffers.buf(ep).ok_or(Error::InvalidEndpoint)?;
        let mut port = Port {
            hal: &mut self.hal,
            online,
            halted: self.halted,
        };
        Ok(f(buf, &mut port))
    }

    /// Received bytes waiting on OUT endpoint `ep`.
    pub fn available(&self, ep: u8) -> usize {
        match endpoint_number(ep) {
            0 => 0,
            n => self.buffers.get(n).map_or(0, |b| b.available()),
        }
    }

    /// Room in IN endpoint `ep`'s buffer.
    pub fn send_space(&self, ep: u8) -> usize {
        match endpoint_number(ep) {
            0 => 0,
            n => self.buffers.get(n).map_or(0, |b| b.send_space()),
        }
    }

    /// Queues what fits of `data` on IN endpoint `ep` without waiting.
    pub fn push(&mut self, ep: u8, data: &[u8]) -> Result<usize, Error> {
        self.with_buffer(ep, |b, io| b.push(data, io))
    }

    /// Takes received bytes from OUT endpoint `ep` without waiting.
    pub fn recv(&mut self, ep: u8, dest: &mut [u8]) -> Result<usize, Error> {
        self.with_buffer(ep, |b, io| b.pop(dest, io))
    }

    /// Sends whatever is queued on IN endpoint `ep` as soon as possible.
    pub fn flush(&mut self, ep: u8) -> Result<(), Error> {
        self.with_buffer(ep, |b, io| b.flush(io))
    }

    fn abort_pending(&mut self, ep: u8) {
        if let Some(b) = self.buffers.buf(endpoint_number(ep)) {
            b.abort_pending();
        }
    }

    fn rebuild_config_descriptor(&mut self) {
        let mut drivers = (&mut self.cdc, &mut self.drivers);
        self.builder.build(&self.config, &mut drivers, &mut self.control);
        self.control.set_state(ControlState::Idle);
    }

    fn stall(&mut self, err: ControlError) {
        warn!("ep0 stall: {}", err);
        self.hal.ep_stall(0);
        self.control.set_state(ControlState::Idle);
    }

    fn handle_setup(&mut self) {
        let mut raw = [0; SETUP_PACKET_LEN];
        let n = self.hal.read_setup(&mut raw);
        let req = match raw.get(..n).and_then(ControlRequest::parse) {
            Some(req) => req,
            None => return self.stall(ControlError::BadSetupLength(n)),
        };
        debug!(
            "setup {:02x} {:02x} {:04x} {:04x} {}",
            req.request_type,
            req.request,
            req.value(),
            req.index(),
            req.length()
        );
        // A SETUP always starts over, whatever was in progress.
        self.control.begin(req);
        let result = match req.kind() {
            RequestKind::Standard => self.standard_request(&req),
            _ => self.class_request(&req),
        };
        if let Err(e) = result {
            self.stall(e);
        }
    }

    fn class_request(&mut self, req: &ControlRequest) -> Result<(), ControlError> {
        if req.is_control_write() {
            let len = usize::from(req.length());
            if len > CTL_BUFFER_SIZE {
                return Err(ControlError::PayloadTooLarge(req.length()));
            }
            // Validation waits until the payload is here.
            self.control.expect_out(len);
            self.hal.ep_rx_enable(0, len.min(EP0_SIZE));
            return Ok(());
        }
        self.offer_to_drivers(req)
    }

    fn offer_to_drivers(&mut self, req: &ControlRequest) -> Result<(), ControlError> {
        if self.cdc.setup(req, &mut self.control) || self.drivers.setup(req, &mut self.control) {
            self.finish_request(req);
            Ok(())
        } else {
            Err(ControlError::Unsupported)
        }
    }

    /// Moves on from SETUP once a request has been accepted: into the data
    /// stage for reads, straight to status otherwise.
    fn finish_request(&mut self, req: &ControlRequest) {
        if req.direction() == UsbDir::In && req.length() != 0 {
            self.control.set_state(ControlState::DataIn);
            self.send_next_in_packet();
        } else {
            self.status_in();
        }
    }

    fn status_in(&mut self) {
        self.hal.ep_write(0, &[]);
        self.control.set_state(ControlState::StatusPending(UsbDir::In));
    }

    fn send_next_in_packet(&mut self) {
        match self.control.next_in_packet() {
            Some(range) => {
                trace!("ep0 > {}", range.len());
                self.hal.ep_write(0, self.control.packet(range));
            }
            None => {
                // The host has everything; now it owes us a status packet.
                self.control.set_state(ControlState::StatusPending(UsbDir::Out));
                self.hal.ep_rx_enable(0, EP0_SIZE);
                self.notify_in_complete();
            }
        }
    }

    fn notify_in_complete(&mut self) {
        let req = *self.control.request();
        self.cdc.control_in_complete(&req);
        self.drivers.control_in_complete(&req);
    }

    /// The deferred half of a control write.
    fn finish_control_write(&mut self) {
        let req = *self.control.request();
        trace!("ep0 data stage complete, {} bytes", req.length());
        let accepted =
            self.cdc.setup(&req, &mut self.control) || self.drivers.setup(&req, &mut self.control);
        if accepted {
            self.status_in();
        } else {
            self.stall(ControlError::Rejected);
        }
    }

    fn standard_request(&mut self, req: &ControlRequest) -> Result<(), ControlError> {
        let code = UsbSetupRequest::from_u8(req.request).ok_or(ControlError::Unsupported)?;
        match (req.recipient(), code) {
            (_, UsbSetupRequest::GetDescriptor) => self.get_descriptor(req),
            (Recipient::Device, UsbSetupRequest::SetAddress) => {
                // Still answering on the old address until status is done.
                self.pending_address = Some(req.value_low() & 0x7F);
                self.status_in();
                Ok(())
            }
            (Recipient::Device, UsbSetupRequest::SetConfiguration) => {
                self.set_configuration(req.value_low())?;
                self.status_in();
                Ok(())
            }
            (Recipient::Device, UsbSetupRequest::GetConfiguration) => {
                self.control.send(TransferFlags::RELEASE, &[self.configuration]);
                self.finish_request(req);
                Ok(())
            }
            (Recipient::Device, UsbSetupRequest::GetStatus) => {
                let status = u16::from(self.config.self_powered) | u16::from(self.remote_wakeup) << 1;
                self.control.send(TransferFlags::RELEASE, &status.to_le_bytes());
                self.finish_request(req);
                Ok(())
            }
            (Recipient::Endpoint, UsbSetupRequest::GetStatus) => {
                let addr = req.index() as u8;
                if !self.has_endpoint(addr) {
                    return Err(ControlError::Unsupported);
                }
                let halted = self.is_halted(addr);
                self.control.send(TransferFlags::RELEASE, &u16::from(halted).to_le_bytes());
                self.finish_request(req);
                Ok(())
            }
            (Recipient::Interface, UsbSetupRequest::GetStatus) => {
                self.control.send(TransferFlags::RELEASE, &[0, 0]);
                self.finish_request(req);
                Ok(())
            }
            (_, UsbSetupRequest::ClearFeature) | (_, UsbSetupRequest::SetFeature) => {
                let set = code == UsbSetupRequest::SetFeature;
                self.feature(req, set)?;
                self.status_in();
                Ok(())
            }
            (Recipient::Interface, UsbSetupRequest::GetInterface) => {
                self.control.send(TransferFlags::RELEASE, &[0]);
                self.finish_request(req);
                Ok(())
            }
            (Recipient::Interface, UsbSetupRequest::SetInterface) if req.value() == 0 => {
                self.status_in();
                Ok(())
            }
            (Recipient::Interface, _) => self.offer_to_drivers(req),
            _ => Err(ControlError::Unsupported),
        }
    }

    fn get_descriptor(&mut self, req: &ControlRequest) -> Result<(), ControlError> {
        match UsbDescType::from_u8(req.value_high()) {
            Some(UsbDescType::Device) => {
                let desc = self.config.device_descriptor();
                self.control.send(TransferFlags::RELEASE, desc.as_bytes());
            }
            Some(UsbDescType::Config) => {
                if !self.builder.is_complete() {
                    return Err(ControlError::DescriptorTooLarge(self.builder.total_length()));
                }
                self.control.send(TransferFlags::RELEASE, self.builder.descriptor());
            }
            Some(UsbDescType::String) => {
                if !self.config.send_string_descriptor(req.value_low(), &mut self.control) {
                    return Err(ControlError::Unsupported);
                }
            }
            _ => {
                let sent = match self.cdc.get_descriptor(req, &mut self.control) {
                    0 => self.drivers.get_descriptor(req, &mut self.control),
                    n => n,
                };
                if sent <= 0 {
                    return Err(ControlError::Unsupported);
                }
            }
        }
        self.finish_request(req);
        Ok(())
    }

    fn set_configuration(&mut self, value: u8) -> Result<(), ControlError> {
        match value {
            0 => {
                debug!("usb: deconfigured");
                self.configuration = 0;
                if self.state == DeviceState::Configured {
                    self.state = DeviceState::Addressed;
                }
                self.halted = 0;
                // Nothing received or queued under the old configuration
                // survives it.
                self.buffers.init_all();
            }
            CONFIGURATION_VALUE => {
                debug!("usb: configured");
                self.configuration = value;
                self.state = DeviceState::Configured;
                self.halted = 0;
                self.configure_endpoints();
            }
            _ => return Err(ControlError::Unsupported),
        }
        Ok(())
    }

    /// Sets up every endpoint the drivers declared, with fresh buffers, and
    /// lets the host start sending on the OUT ones right away.
    fn configure_endpoints(&mut self) {
        let hal = &mut self.hal;
        let buffers = &mut self.buffers;
        let mut setup = |spec: &EndpointSpec| {
            let ep = spec.number();
            let buf = match buffers.buf(ep) {
                Some(b) if ep != 0 => b,
                _ => {
                    warn!("usb: endpoint {:#04x} out of range", spec.address);
                    return;
                }
            };
            hal.ep_setup(spec);
            // Drop anything queued between reset and now.
            buf.init(ep);
            if spec.dir() == UsbDir::Out {
                buf.enable_out_endpoint(&mut Port {
                    hal: &mut *hal,
                    online: true,
                    halted: 0,
                });
            }
        };
        self.cdc.for_each_endpoint(&mut setup);
        self.drivers.for_each_endpoint(&mut setup);
    }

    fn is_halted(&self, ep_addr: u8) -> bool {
        self.halted & halt_bit(ep_addr) != 0
    }

    /// Whether `ep_addr` is endpoint 0 or one of the drivers' endpoints,
    /// in the direction given.
    fn has_endpoint(&self, ep_addr: u8) -> bool {
        if endpoint_number(ep_addr) == 0 {
            return true;
        }
        let mut found = false;
        let mut check = |spec: &EndpointSpec| found |= spec.address == ep_addr;
        self.cdc.for_each_endpoint(&mut check);
        self.drivers.for_each_endpoint(&mut check);
        found
    }

    fn feature(&mut self, req: &ControlRequest, set: bool) -> Result<(), ControlError> {
        match (req.recipient(), UsbFeature::from_u16(req.value())) {
            (Recipient::Device, Some(UsbFeature::DeviceRemoteWakeup)) => {
                if !self.config.remote_wakeup {
                    return Err(ControlError::Unsupported);
                }
                self.remote_wakeup = set;
                Ok(())
            }
            (Recipient::Endpoint, Some(UsbFeature::EndpointHalt)) => {
                let addr = req.index() as u8;
                if !self.has_endpoint(addr) {
                    return Err(ControlError::Unsupported);
                }
                let ep = endpoint_number(addr);
                if ep == 0 {
                    // Endpoint 0 can't really be halted; nothing to do.
                    return Ok(());
                }
                let online = self.online();
                let buf = self.buffers.buf(ep).ok_or(ControlError::Unsupported)?;
                // Either way, whatever was staged is stale now.
                buf.init(ep);
                if set {
                    self.halted |= halt_bit(addr);
                    self.hal.ep_stall(addr);
                } else {
                    self.halted &= !halt_bit(addr);
                    self.hal.ep_clear_stall(addr);
                    if UsbDir::of_endpoint_addr(addr) == UsbDir::Out {
                        buf.enable_out_endpoint(&mut Port {
                            hal: &mut self.hal,
                            online,
                            halted: self.halted,
                        });
                    }
                }
                Ok(())
            }
            _ => Err(ControlError::Unsupported),
        }
    }

    fn ep0_in(&mut self) {
        match self.control.state() {
            ControlState::DataIn => self.send_next_in_packet(),
            ControlState::StatusPending(UsbDir::In) => {
                if let Some(addr) = self.pending_address.take() {
                    debug!("usb: address {}", addr);
                    self.hal.set_address(addr);
                    self.state = match (self.state, addr) {
                        (_, 0) => DeviceState::Default,
                        (DeviceState::Default, _) => DeviceState::Addressed,
                        (s, _) => s,
                    };
                }
                self.control.set_state(ControlState::Idle);
                self.notify_in_complete();
            }
            s => trace!("ep0 in while {:?}", s),
        }
    }

    fn ep0_out(&mut self) {
        let mut packet = [0; EP0_SIZE];
        let n = self.hal.ep_read(0, &mut packet);
        match self.control.state() {
            ControlState::AwaitingDataOut => {
                trace!("ep0 < {}", n);
                if self.control.accept_out(&packet[..n]) {
                    self.finish_control_write();
                } else {
                    let more = self.control.out_remaining().min(EP0_SIZE);
                    self.hal.ep_rx_enable(0, more);
                }
            }
            ControlState::StatusPending(UsbDir::Out) => {
                self.control.set_state(ControlState::Idle);
            }
            s => trace!("ep0 out ({} bytes) while {:?}", n, s),
        }
    }

    fn data_in(&mut self, ep: u8) {
        let online = self.online();
        match self.buffers.buf(ep) {
            Some(b) => b.on_in_transfer_done(&mut Port {
                hal: &mut self.hal,
                online,
                halted: self.halted,
            }),
            None => warn!("usb: IN on unknown endpoint {}", ep),
        }
    }

    fn data_out(&mut self, ep: u8) {
        let online = self.online();
        match self.buffers.buf(ep) {
            Some(b) => {
                let n = self.hal.ep_read(ep, b.rx_buffer_mut());
                b.on_out_transfer_done(
                    n,
                    &mut Port {
                        hal: &mut self.hal,
                        online,
                        halted: self.halted,
                    },
                );
            }
            None => warn!("usb: OUT on unknown endpoint {}", ep),
        }
    }
}

impl<H: UsbHal, D: ClassDriver, N: TransactionHandler> TransactionHandler for UsbCore<H, D, N> {
    fn transaction_setup(&mut self, ep: u8) {
        trace!("ep{} setup", ep);
        self.handle_setup();
        self.next.transaction_setup(ep);
    }

    fn transaction_in(&mut self, ep: u8) {
        match endpoint_number(ep) {
            0 => self.ep0_in(),
            n => self.data_in(n),
        }
        self.next.transaction_in(ep);
    }

    fn transaction_out(&mut self, ep: u8) {
        match endpoint_number(ep) {
            0 => self.ep0_out(),
            n => self.data_out(n),
        }
        self.next.transaction_out(ep);
    }

    fn transaction_unknown(&mut self, ep: u8) {
        warn!("usb: unclassified transaction on ep{}", ep);
        self.next.transaction_unknown(ep);
    }

    fn bus_reset(&mut self) {
        debug!("usb: bus reset");
        self.state = DeviceState::Default;
        self.resume_state = DeviceState::Default;
        self.configuration = 0;
        self.remote_wakeup = false;
        self.pending_address = None;
        self.halted = 0;
        self.hal.set_address(0);
        self.buffers.init_all();
        self.cdc.reset();
        self.drivers.reset();
        self.rebuild_config_descriptor();
        self.next.bus_reset();
    }

    fn suspend(&mut self) {
        debug!("usb: suspend");
        if self.state != DeviceState::Suspended {
            self.resume_state = self.state;
            self.state = DeviceState::Suspended;
        }
        self.next.suspend();
    }

    fn resume(&mut self) {
        debug!("usb: resume");
        if self.state == DeviceState::Suspended {
            self.state = self.resume_state;
        }
        self.next.resume();
    }
}

impl<H, D, N, M> IrqMutex<UsbCore<H, D, N>, M>
where
    H: UsbHal,
    D: ClassDriver,
    N: TransactionHandler,
    M: InterruptMask,
{
    /// Blocking send on IN endpoint `ep`.
    ///
    /// Spins until all of `data` is queued, releasing the lock between
    /// attempts so the interrupt can drain the buffer. Nothing is flushed
    /// beyond what filling the buffer forces; call `flush` to push out the
    /// tail. Gives up with `Error::Timeout` after `SEND_TIMEOUT_MS`, in which
    /// case bytes this call queued but never handed to hardware are
    /// discarded.
    pub fn send(&self, ep: u8, data: &[u8]) -> Result<usize, Error> {
        let ep = endpoint_number(ep);
        if ep == 0 {
            return Err(Error::ControlEndpoint);
        }
        let start = self.lock(|core| core.hal.millis());
        let mut wrote = 0;
        while wrote < data.len() {
            let pushed = self.lock(|core| {
                if core.hal.millis().wrapping_sub(start) > SEND_TIMEOUT_MS {
                    warn!("ep{} send timed out, {} of {} sent", ep, wrote, data.len());
                    core.abort_pending(ep);
                    return Err(Error::Timeout);
                }
                core.push(ep, &data[wrote..])
            })?;
            wrote += pushed;
        }
        Ok(wrote)
    }

    /// Non-blocking receive; see `UsbCore::recv`.
    pub fn recv(&self, ep: u8, dest: &mut [u8]) -> Result<usize, Error> {
        self.lock(|core| core.recv(ep, dest))
    }

    pub fn flush(&self, ep: u8) -> Result<(), Error> {
        self.lock(|core| core.flush(ep))
    }

    pub fn available(&self, ep: u8) -> usize {
        self.lock(|core| core.available(ep))
    }

    pub fn send_space(&self, ep: u8) -> usize {
        self.lock(|core| core.send_space(ep))
    }
}
