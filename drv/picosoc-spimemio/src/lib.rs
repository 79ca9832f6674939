// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PicoSoC SPI flash controller (`spimemio`) driver.
//!
//! The controller maps the flash into the address space and fetches code
//! from it. Its single configuration register selects the read framing (dummy
//! cycles, dual/quad I/O, DDR, continuous read); the flash chip has matching
//! volatile registers that must agree with it. Commands to the chip itself go
//! through a [`worker::Executor`], which runs them from RAM.

#![cfg_attr(target_os = "none", no_std)]

pub mod s25fl;
pub mod worker;

use bitfield::bitfield;
use ringbuf::*;
use static_assertions::const_assert_eq;
use vcell::VolatileCell;

pub use s25fl::{Command, Register};
pub use worker::{Executor, InstallError};

/// The controller's register file.
#[repr(C)]
pub struct RegisterBlock {
    cfg: VolatileCell<u32>,
}

const_assert_eq!(core::mem::size_of::<RegisterBlock>(), 4);

impl RegisterBlock {
    /// Returns the controller's register block.
    ///
    /// # Safety
    ///
    /// Only valid on the PicoSoC, and the caller must not create more than
    /// one [`SpiMemIo`] over it.
    pub unsafe fn get() -> &'static Self {
        unsafe { &*(drv_picosoc_sys::SPIMEMIO_CFG as *const Self) }
    }

    /// A register block that lives in ordinary memory, holding `cfg`.
    pub const fn detached(cfg: u32) -> Self {
        Self {
            cfg: VolatileCell::new(cfg),
        }
    }
}

bitfield! {
    /// Controller configuration register.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct Config(u32);
    impl Debug;
    /// Memory-mapped mode; cleared while the worker drives the bus.
    pub memio, set_memio: 31;
    /// Double data rate. Without `quad` this selects dual I/O.
    pub ddr, set_ddr: 22;
    pub quad, set_quad: 21;
    /// Continuous read: the opcode is sent once and then omitted.
    pub crm, set_crm: 20;
    pub u8, latency, set_latency: 19, 16;
}

impl From<Config> for u32 {
    fn from(c: Config) -> u32 {
        c.0
    }
}

/// Bits 20..=22 together.
const TRANSPORT_MASK: u32 = 0x0070_0000;

/// Transport presets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Single,
    Dual,
    Quad,
    QuadDdr,
}

impl Mode {
    /// The mode-select bits for this preset, without continuous read.
    pub const fn bits(self) -> u32 {
        match self {
            Mode::Single => 0x0000_0000,
            Mode::Dual => 0x0040_0000,
            Mode::Quad => 0x0020_0000,
            Mode::QuadDdr => 0x0060_0000,
        }
    }
}

/// The chip's volatile registers, as dumped by
/// [`SpiMemIo::read_config_registers`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigRegisters {
    pub sr1v: u8,
    pub sr2v: u8,
    pub cr1v: u8,
    pub cr2v: u8,
    pub cr3v: u8,
    pub vdlp: u8,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Transmit { opcode: u8, len: usize, wren: bool },
    RegisterRead(Register, u8),
    RegisterWrite(Register, u8),
    Latency(u8),
    Transport(u32),
    QuadEnable { before: u8, after: u8 },
}

ringbuf!(Trace, 16, Trace::None);

/// Command transport to the flash chip.
pub struct Flash<E> {
    exec: E,
}

impl<E: Executor> Flash<E> {
    pub fn new(exec: E) -> Self {
        Self { exec }
    }

    /// Sends `buf` to the chip and replaces it with what the chip sent back.
    ///
    /// If `wren` is given it is sent as its own command first. Nothing the
    /// chip returns is checked.
    pub fn transmit(&mut self, buf: &mut [u8], wren: Option<Command>) {
        ringbuf_entry!(Trace::Transmit {
            opcode: buf.first().copied().unwrap_or(0),
            len: buf.len(),
            wren: wren.is_some(),
        });
        self.exec.run(buf, wren.map(u8::from).unwrap_or(0));
    }

    /// Reads the identification bytes.
    pub fn read_id(&mut self) -> [u8; s25fl::ID_LEN] {
        let mut buf = [0u8; s25fl::ID_LEN + 1];
        buf[0] = Command::ReadId.into();
        self.transmit(&mut buf, None);

        let mut id = [0u8; s25fl::ID_LEN];
        id.copy_from_slice(&buf[1..]);
        id
    }

    /// Reads one register. `latency` must be the number of dummy cycles the
    /// chip is currently configured for.
    pub fn read_any_register(&mut self, reg: Register, latency: u8) -> u8 {
        let [a2, a1, a0] = reg.addr_bytes();
        let mut buf = [Command::ReadAnyRegister.into(), a2, a1, a0, 0, 0, 0];
        self.transmit(&mut buf, None);
        let val = s25fl::rdar_value(&buf, latency);
        ringbuf_entry!(Trace::RegisterRead(reg, val));
        val
    }

    /// Writes one register, preceded by write enable.
    pub fn write_any_register(&mut self, reg: Register, val: u8) {
        let [a2, a1, a0] = reg.addr_bytes();
        let mut buf: [u8; s25fl::WRAR_LEN] =
            [Command::WriteAnyRegister.into(), a2, a1, a0, val];
        ringbuf_entry!(Trace::RegisterWrite(reg, val));
        self.transmit(&mut buf, Some(Command::WriteEnable));
    }
}

/// Flash mode control: the controller's configuration register and the
/// chip-side registers that have to match it.
///
/// No copy of the configuration is kept; every change reads the register
/// first.
pub struct SpiMemIo<'a, E> {
    reg: &'a RegisterBlock,
    flash: Flash<E>,
}

impl<'a, E: Executor> SpiMemIo<'a, E> {
    pub fn new(reg: &'a RegisterBlock, exec: E) -> Self {
        Self {
            reg,
            flash: Flash::new(exec),
        }
    }

    /// Direct access to the command transport.
    pub fn flash(&mut self) -> &mut Flash<E> {
        &mut self.flash
    }

    pub fn config(&self) -> Config {
        Config(self.reg.cfg.get())
    }

    fn modify(&self, f: impl FnOnce(&mut Config)) {
        let mut cfg = self.config();
        f(&mut cfg);
        self.reg.cfg.set(cfg.0);
    }

    /// Sets the number of read dummy cycles on both the controller and the
    /// chip.
    ///
    /// Both fields are four bits wide. A `value` above 15 is truncated to its
    /// low four bits before either side is written, so the chip gets
    /// `0x70 | (value & 0xf)` rather than `0x70 | value`.
    pub fn set_latency(&mut self, value: u8) {
        let value = value & 0xf;
        self.modify(|c| c.set_latency(value));
        self.flash.write_any_register(Register::Cr3v, s25fl::cr3v(value));
        ringbuf_entry!(Trace::Latency(value));
    }

    /// Reads a chip register using the controller's current latency.
    pub fn read_register(&mut self, reg: Register) -> u8 {
        let latency = self.config().latency();
        self.flash.read_any_register(reg, latency)
    }

    /// Sets the quad enable bit in the chip's CR1V.
    ///
    /// This only changes the chip. Quad transport on the controller is
    /// selected separately with [`SpiMemIo::set_mode`].
    pub fn enable_quad_mode(&mut self) {
        let before = self.read_register(Register::Cr1v);
        let after = before | s25fl::CR1V_QE;
        self.flash.write_any_register(Register::Cr1v, after);
        ringbuf_entry!(Trace::QuadEnable { before, after });
    }

    /// Selects a transport preset and the continuous read bit together.
    pub fn set_transport(&mut self, mode: Mode, continuous: bool) {
        let bits = mode.bits() | if continuous { 1 << 20 } else { 0 };
        self.modify(|c| c.0 = (c.0 & !TRANSPORT_MASK) | bits);
        ringbuf_entry!(Trace::Transport(bits));
    }

    /// Selects a transport preset. Continuous read is switched off.
    pub fn set_mode(&mut self, mode: Mode) {
        self.set_transport(mode, false);
    }

    pub fn set_continuous_read(&mut self, on: bool) {
        self.modify(|c| c.set_crm(on));
    }

    pub fn toggle_continuous_read(&mut self) {
        self.modify(|c| c.set_crm(!c.crm()));
    }

    pub fn read_id(&mut self) -> [u8; s25fl::ID_LEN] {
        self.flash.read_id()
    }

    /// Reads all of the chip's volatile status and configuration registers.
    pub fn read_config_registers(&mut self) -> ConfigRegisters {
        let mut v = [0u8; 6];
        for (slot, reg) in v.iter_mut().zip(Register::ALL) {
            *slot = self.read_register(reg);
        }
        let [sr1v, sr2v, cr1v, cr2v, cr3v, vdlp] = v;
        ConfigRegisters {
            sr1v,
            sr2v,
            cr1v,
            cr2v,
            cr3v,
            vdlp,
        }
    }
}
