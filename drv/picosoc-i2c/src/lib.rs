// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A driver for the hard I2C core on the PicoSoC (iCE40 UltraPlus `SB_I2C`),
//! operated as the only master on its bus.
//!
//! Everything is polled. A transaction is bracketed by [`I2cController::begin`]
//! and [`I2cController::stop`]; in between, every byte moved is preceded by a
//! wait on the status register. By default those waits never give up, the
//! same as the hardware's own behavior when a device does not answer; a
//! bounded [`WaitPolicy`] turns a silent device into an error instead.

#![cfg_attr(target_os = "none", no_std)]

use bitflags::bitflags;
use drv_picosoc_sys::Cycles;
use num_derive::FromPrimitive;
use ringbuf::*;
use static_assertions::const_assert_eq;
use vcell::VolatileCell;

/// Byte-wide registers of the core, by register number.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    CR1 = 0x08,
    CMDR = 0x09,
    BRLSB = 0x0a,
    BRMSB = 0x0b,
    SR = 0x0c,
    TXDR = 0x0d,
    RXDR = 0x0e,
}

bitflags! {
    /// Command register.
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct Cmdr: u8 {
        /// Generate a (repeated) start.
        const STA = 1 << 7;
        const STO = 1 << 6;
        const RD = 1 << 5;
        const WR = 1 << 4;
        /// Answer received bytes with NACK.
        const ACK = 1 << 3;
        /// Disable clock stretching.
        const CKSDIS = 1 << 2;
        const RBUFDIS = 1 << 1;
        const IACK = 1 << 0;
    }
}

bitflags! {
    /// Status register.
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct Sr: u8 {
        const TIP = 1 << 7;
        const BUSY = 1 << 6;
        const RARC = 1 << 5;
        /// Addressed slave is ready for a read.
        const SRW = 1 << 4;
        const ARBL = 1 << 3;
        /// Transmitter or receiver ready.
        const TRRDY = 1 << 2;
        const TROE = 1 << 1;
        const HGC = 1 << 0;
        const _ = !0;
    }
}

/// Control register: core enable.
pub const CR1_I2CEN: u8 = 1 << 7;

/// Cycles between taking the last byte and asking for NACK and stop.
const LAST_READ_SETTLE: u32 = 300;

/// Commands the driver issues.
mod cmd {
    use super::Cmdr;

    pub const START_WRITE: Cmdr = Cmdr::STA.union(Cmdr::WR).union(Cmdr::CKSDIS);
    pub const READ: Cmdr = Cmdr::RD.union(Cmdr::CKSDIS);
    pub const WRITE: Cmdr = Cmdr::WR.union(Cmdr::CKSDIS);
    pub const STOP: Cmdr = Cmdr::STO.union(Cmdr::CKSDIS);
    pub const READ_LAST: Cmdr = Cmdr::STO
        .union(Cmdr::RD)
        .union(Cmdr::ACK)
        .union(Cmdr::CKSDIS);
}

/// Access to the core's register file.
pub trait Registers {
    fn read(&self, reg: Register) -> u8;
    fn write(&self, reg: Register, val: u8);
}

impl<R: Registers + ?Sized> Registers for &R {
    fn read(&self, reg: Register) -> u8 {
        (**self).read(reg)
    }
    fn write(&self, reg: Register, val: u8) {
        (**self).write(reg, val)
    }
}

/// The memory-mapped register file: one register per word, register number
/// as the word index.
#[repr(C)]
pub struct RegisterBlock {
    words: [VolatileCell<u32>; 16],
}

const_assert_eq!(core::mem::size_of::<RegisterBlock>(), 64);

impl RegisterBlock {
    /// # Safety
    ///
    /// Only valid on the PicoSoC, and there must be a single controller for
    /// the core.
    pub unsafe fn get() -> &'static Self {
        unsafe { &*(drv_picosoc_sys::I2C_BASE as *const Self) }
    }
}

impl Registers for RegisterBlock {
    fn read(&self, reg: Register) -> u8 {
        self.words[reg as usize].get() as u8
    }

    fn write(&self, reg: Register, val: u8) {
        self.words[reg as usize].set(u32::from(val));
    }
}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ResponseCode {
    /// Addressed device did not respond
    NoDevice = 3,
    /// A data byte did not complete
    BusLocked = 19,
}

/// How long a status wait may spin.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum WaitPolicy {
    /// Spin until the bit is set.
    #[default]
    Forever,
    /// Give up after this many reads of the status register.
    Polls(u32),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Clock divider, written once by [`I2cController::init`].
    pub prescale: u16,
    pub wait: WaitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prescale: 50,
            wait: WaitPolicy::Forever,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Init(u16),
    Begin { addr: u8, read: bool },
    Tx(u8),
    Rx(u8),
    RxLast(u8),
    Stop,
    Timeout { want: Sr, sr: Sr, code: ResponseCode },
}

ringbuf!(Trace, 32, Trace::None);

pub struct I2cController<R, C> {
    regs: R,
    cycles: C,
    config: Config,
}

impl<R: Registers, C: Cycles> I2cController<R, C> {
    pub fn new(regs: R, cycles: C, config: Config) -> Self {
        Self {
            regs,
            cycles,
            config,
        }
    }

    /// The cycle counter, for device drivers that need to wait on a
    /// conversion.
    pub fn cycles(&self) -> &C {
        &self.cycles
    }

    /// Enables the core and programs the clock divider.
    pub fn init(&self) {
        let [msb, lsb] = self.config.prescale.to_be_bytes();
        self.regs.write(Register::CR1, CR1_I2CEN);
        self.regs.write(Register::BRMSB, msb);
        self.regs.write(Register::BRLSB, lsb);
        ringbuf_entry!(Trace::Init(self.config.prescale));
    }

    fn command(&self, cmd: Cmdr) {
        self.regs.write(Register::CMDR, cmd.bits());
    }

    fn wait(&self, want: Sr, code: ResponseCode) -> Result<(), ResponseCode> {
        let mut polls = 0u32;
        loop {
            let sr = Sr::from_bits_retain(self.regs.read(Register::SR));
            if sr.contains(want) {
                return Ok(());
            }
            if let WaitPolicy::Polls(limit) = self.config.wait {
                polls += 1;
                if polls >= limit {
                    ringbuf_entry!(Trace::Timeout { want, sr, code });
                    return Err(code);
                }
            }
        }
    }

    /// Sends a start and the address of `addr` with the direction bit.
    ///
    /// For a read this waits for the slave and then starts receiving; for a
    /// write it waits for the address byte to go out.
    pub fn begin(&self, addr: u8, is_read: bool) -> Result<(), ResponseCode> {
        ringbuf_entry!(Trace::Begin {
            addr,
            read: is_read
        });
        self.regs.write(Register::TXDR, addr << 1 | u8::from(is_read));
        self.command(cmd::START_WRITE);
        self.command(Cmdr::empty());

        if is_read {
            self.wait(Sr::SRW, ResponseCode::NoDevice)?;
            self.command(cmd::READ);
        } else {
            self.wait(Sr::TRRDY, ResponseCode::NoDevice)?;
        }
        Ok(())
    }

    pub fn write(&self, byte: u8) -> Result<(), ResponseCode> {
        ringbuf_entry!(Trace::Tx(byte));
        self.regs.write(Register::TXDR, byte);
        self.command(cmd::WRITE);
        self.wait(Sr::TRRDY, ResponseCode::BusLocked)?;
        self.command(Cmdr::empty());
        Ok(())
    }

    /// Receives one byte. The last byte of a read is answered with NACK and
    /// followed by a stop condition on the bus.
    pub fn read(&self, is_last: bool) -> Result<u8, ResponseCode> {
        if is_last {
            let byte = self.regs.read(Register::RXDR);
            self.cycles.delay(LAST_READ_SETTLE);
            self.command(cmd::READ_LAST);
            self.wait(Sr::TRRDY, ResponseCode::BusLocked)?;
            ringbuf_entry!(Trace::RxLast(byte));
            Ok(byte)
        } else {
            self.wait(Sr::TRRDY, ResponseCode::BusLocked)?;
            let byte = self.regs.read(Register::RXDR);
            ringbuf_entry!(Trace::Rx(byte));
            Ok(byte)
        }
    }

    /// Ends the transaction. Does not wait.
    pub fn stop(&self) {
        ringbuf_entry!(Trace::Stop);
        self.command(cmd::STOP);
    }

    /// Writes `wbuf` to `addr`, then, if `rbuf` is not empty, reads into it
    /// after a repeated start. The transaction is always ended with a stop,
    /// including when a wait fails.
    pub fn write_read(
        &self,
        addr: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), ResponseCode> {
        let r = self.write_read_inner(addr, wbuf, rbuf);
        self.stop();
        r
    }

    fn write_read_inner(
        &self,
        addr: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), ResponseCode> {
        self.begin(addr, false)?;
        for &byte in wbuf {
            self.write(byte)?;
        }

        if rbuf.is_empty() {
            return Ok(());
        }

        self.begin(addr, true)?;
        let last = rbuf.len() - 1;
        for (i, byte) in rbuf.iter_mut().enumerate() {
            *byte = self.read(i == last)?;
        }
        Ok(())
    }
}
