// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RP2040 USB serial echo.
//!
//! Plug it in, open `/dev/ttyACM0` (or whatever your OS calls it), and
//! whatever you type comes back. The LED is lit while there's data moving.
//!
//! Everything the chip needs before USB can work is set up here, in order:
//! pins, then clocks (crystal, a 132 MHz system PLL, the 48 MHz USB PLL, and
//! a 1 MHz tick for the timer), then the USB controller itself, which the
//! library's `rp2040` module takes from there.
//!
//! From then on there are two threads of control. The `USBCTRL_IRQ` handler
//! feeds controller events to the `UsbCore`; `main` loops reading and
//! writing the serial port. They share the core through `USB`, an
//! `IrqMutex` that masks the USB interrupt while `main` holds it.
//!
//! Opening the port at 1200 baud and closing it again reboots the chip, which
//! is what Arduino-style upload tools expect.
//!
//! # A note on `unsafe`
//!
//! As usual with `rp2040_pac`, most `unsafe` below is inside register
//! `write`s and `modify`s, because the PAC marks plain field writes unsafe.
//! Those don't get comments.

#![no_std]
#![no_main]

use cortex_m::peripheral::{NVIC, SCB};
use cortex_m_rt::entry;
use rp2040_pac::{interrupt, Interrupt};

use panic_halt as _;

use usb_acm_core::rp2040::{self as usbctrl, Rp2040Usb, UsbIrqMask};
use usb_acm_core::{CdcAcm, CdcSerial, DeviceConfig, IrqMutex, UsbCore};

cfg_if::cfg_if! {
    if #[cfg(feature = "target-pico")] {
        const LED_PIN: u8 = 25;
        const PRODUCT: &str = "Pico Serial";

        // The Pi Pico uses a Winbond W25Q080 flash chip.
        #[link_section = ".boot2"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
    } else if #[cfg(feature = "target-feather")] {
        const LED_PIN: u8 = 13;
        const PRODUCT: &str = "Feather RP2040 Serial";

        // The Feather's GigaDevice flash is happy with plain 03h reads.
        #[link_section = ".boot2"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;
    } else {
        compile_error!("missing or unknown target-* feature");
    }
}

type Core = UsbCore<Rp2040Usb>;

static USB: IrqMutex<Core, UsbIrqMask> = IrqMutex::new(UsbIrqMask);

/// Raspberry Pi's VID with their generic "Pico SDK CDC UART" PID.
const CONFIG: DeviceConfig = DeviceConfig::new()
    .with_ids(0x2e8a, 0x000a)
    .with_strings("Raspberry Pi", PRODUCT, None);

#[entry]
fn main() -> ! {
    let p = rp2040_pac::Peripherals::take().unwrap();

    init_led(&p);
    init_clocks(&p);
    init_timer(&p);

    let hal = Rp2040Usb::new(p.USBCTRL_REGS, p.USBCTRL_DPRAM, p.TIMER, &p.RESETS);
    let mut core = Core::new(hal, CONFIG, CdcAcm::new(1), (), ());
    // Pull-up on. The host will reset us right away, but the interrupt stays
    // masked until the core is in place to hear about it.
    core.start();
    USB.init(core);
    // Safety: `USB` is initialized, so the handler has something to work on.
    unsafe { NVIC::unmask(Interrupt::USBCTRL_IRQ) };

    let serial = CdcSerial::new(&USB);
    serial.begin();

    let mut buf = [0; 64];
    loop {
        if serial.touch_requested() {
            SCB::sys_reset();
        }

        let n = serial.read_into(&mut buf);
        if n == 0 {
            lower_pin(&p.SIO, LED_PIN);
            continue;
        }
        raise_pin(&p.SIO, LED_PIN);
        if serial.write(&buf[..n]) == 0 {
            // Nobody listening, or the host stopped reading. Drop it.
            serial.clear_write_error();
        }
    }
}

#[interrupt]
fn USBCTRL_IRQ() {
    // Before `init`, there is nothing to dispatch to.
    USB.try_lock(usbctrl::dispatch);
}

fn init_led(p: &rp2040_pac::Peripherals) {
    // IO bank 0 out of reset so we can configure a pin. SIO itself never
    // needs resetting.
    p.RESETS.reset.modify(|_, w| w.io_bank0().clear_bit());
    while !p.RESETS.reset_done.read().io_bank0().bit() {}

    p.IO_BANK0.gpio[LED_PIN as usize].gpio_ctrl.write(|w| w.funcsel().sio());
    p.SIO.gpio_oe_set.write(|w| unsafe { w.bits(1 << LED_PIN) });
}

/// Moves from the ring oscillator to the 12 MHz crystal, runs the system at
/// 132 MHz from PLL_SYS and USB at 48 MHz from PLL_USB.
fn init_clocks(p: &rp2040_pac::Peripherals) {
    // Start XOSC and wait for it to stabilize.
    p.XOSC.ctrl.write(|w| unsafe { w.bits(0xfab_aa0) });
    while !p.XOSC.status.read().stable().bit() {}
    // clk_ref (and so clk_sys) from XOSC. The mux is glitchless.
    p.CLOCKS.clk_ref_ctrl.write(|w| w.src().xosc_clksrc());
    while p.CLOCKS.clk_ref_selected.read().bits() != (1 << 2) {}
    // ROSC off.
    p.ROSC.ctrl.write(|w| unsafe { w.bits(0xd1e_fa4) });

    // PLL_SYS: REFDIV 1, FBDIV 132 => VCO 1584 MHz; post dividers 6 * 2
    // => 132 MHz.
    p.RESETS.reset.modify(|_, w| w.pll_sys().clear_bit());
    while !p.RESETS.reset_done.read().pll_sys().bit() {}
    p.PLL_SYS.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_SYS.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(132) });
    p.PLL_SYS.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_SYS.cs.read().lock().bit() {}
    p.PLL_SYS.prim.write(|w| unsafe { w.postdiv1().bits(6).postdiv2().bits(2) });
    p.PLL_SYS.pwr.modify(|_, w| w.postdivpd().clear_bit());

    p.CLOCKS.clk_sys_ctrl.write(|w| w.auxsrc().clksrc_pll_sys());
    p.CLOCKS.clk_sys_ctrl.modify(|_, w| w.src().clksrc_clk_sys_aux());
    while p.CLOCKS.clk_sys_selected.read().bits() != (1 << 1) {}

    p.CLOCKS
        .clk_peri_ctrl
        .write(|w| w.auxsrc().clk_sys().enable().set_bit());

    // PLL_USB: REFDIV 1, FBDIV 100 => VCO 1200 MHz; post dividers 5 * 5
    // => 48 MHz.
    p.RESETS.reset.modify(|_, w| w.pll_usb().clear_bit());
    while !p.RESETS.reset_done.read().pll_usb().bit() {}
    p.PLL_USB.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_USB.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(100) });
    p.PLL_USB.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_USB.cs.read().lock().bit() {}
    p.PLL_USB.prim.write(|w| unsafe { w.postdiv1().bits(5).postdiv2().bits(5) });
    p.PLL_USB.pwr.modify(|_, w| w.postdivpd().clear_bit());

    p.CLOCKS
        .clk_usb_ctrl
        .write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());
}

/// The timer counts watchdog ticks, which we derive from the 12 MHz clk_ref
/// to get microseconds. `Rp2040Usb::millis` relies on that.
fn init_timer(p: &rp2040_pac::Peripherals) {
    p.WATCHDOG
        .tick
        .write(|w| unsafe { w.cycles().bits(12).enable().set_bit() });
    p.RESETS.reset.modify(|_, w| w.timer().clear_bit());
    while !p.RESETS.reset_done.read().timer().bit() {}
}

/// The pin must already be configured as an SIO output.
#[inline(always)]
fn raise_pin(sio: &rp2040_pac::SIO, pin: u8) {
    sio.gpio_out_set.write(|w| unsafe { w.bits(1 << pin) });
}

#[inline(always)]
fn lower_pin(sio: &rp2040_pac::SIO, pin: u8) {
    sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << pin) });
}
