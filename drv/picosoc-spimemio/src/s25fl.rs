// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The part of the S25FL-L command set that the controller needs.

use num_derive::FromPrimitive;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    WriteEnable = 0x06,
    ReadAnyRegister = 0x65,
    WriteAnyRegister = 0x71,
    ReadId = 0x9F,
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

/// Volatile status and configuration registers, by their read/write any
/// register address.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum Register {
    Sr1v = 0x80_0000,
    Sr2v = 0x80_0001,
    Cr1v = 0x80_0002,
    Cr2v = 0x80_0003,
    Cr3v = 0x80_0004,
    Vdlp = 0x80_0005,
}

impl Register {
    pub const ALL: [Register; 6] = [
        Register::Sr1v,
        Register::Sr2v,
        Register::Cr1v,
        Register::Cr2v,
        Register::Cr3v,
        Register::Vdlp,
    ];

    /// The 24-bit address, most significant byte first.
    pub fn addr_bytes(self) -> [u8; 3] {
        let a = self as u32;
        [(a >> 16) as u8, (a >> 8) as u8, a as u8]
    }
}

/// Quad enable bit in CR1V.
pub const CR1V_QE: u8 = 1 << 1;

/// CR3V value selecting `latency` read dummy cycles. The upper bits keep the
/// wrap length at the chip's default.
pub const fn cr3v(latency: u8) -> u8 {
    0x70 | (latency & 0xf)
}

/// Number of identification bytes returned by [`Command::ReadId`].
pub const ID_LEN: usize = 16;

/// Read any register frame: opcode, address, then enough bytes to cover up
/// to 15 dummy cycles plus the data byte.
pub const RDAR_LEN: usize = 7;

/// Write any register frame: opcode, address, data.
pub const WRAR_LEN: usize = 5;

/// Picks the register value out of a completed read any register frame.
///
/// The chip starts driving data `latency` cycles after the last address bit,
/// so the byte is found at that bit offset into the tail of the frame.
pub fn rdar_value(frame: &[u8; RDAR_LEN], latency: u8) -> u8 {
    let tail = u32::from(frame[4]) << 16
        | u32::from(frame[5]) << 8
        | u32::from(frame[6]);
    (tail >> (16 - u32::from(latency & 0xf))) as u8
}
