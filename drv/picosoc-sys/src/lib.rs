// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PicoSoC platform definitions: the memory map of the peripherals driven by
//! the `drv-picosoc-*` crates, and the cycle counter used for delays.

#![cfg_attr(target_os = "none", no_std)]

/// Configuration register of the SPI memory-mapped flash controller.
pub const SPIMEMIO_CFG: usize = 0x0200_0000;

/// Base of the I2C core register file.
pub const I2C_BASE: usize = 0x0501_0040;

/// The I2C core decodes one register per 32-bit word.
pub const I2C_STRIDE: usize = 4;

/// A free-running cycle counter.
///
/// Reading the counter must have no side effects. The counter is allowed to
/// wrap; delays are computed with wrapping arithmetic.
pub trait Cycles {
    fn now(&self) -> u32;

    /// Busy-waits until the counter has advanced by at least `cycles`.
    fn delay(&self, cycles: u32) {
        let start = self.now();
        while self.now().wrapping_sub(start) < cycles {}
    }
}

impl<C: Cycles + ?Sized> Cycles for &C {
    fn now(&self) -> u32 {
        (**self).now()
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv32")] {
        /// The `cycle` CSR, read with `rdcycle`.
        #[derive(Copy, Clone, Debug, Default)]
        pub struct Rdcycle;

        impl Cycles for Rdcycle {
            #[inline(always)]
            fn now(&self) -> u32 {
                riscv::register::cycle::read() as u32
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        t: Cell<u32>,
        reads: Cell<u32>,
    }

    impl Cycles for Counter {
        fn now(&self) -> u32 {
            self.reads.set(self.reads.get() + 1);
            let t = self.t.get();
            self.t.set(t.wrapping_add(7));
            t
        }
    }

    #[test]
    fn delay_waits_at_least_requested() {
        let c = Counter {
            t: Cell::new(100),
            reads: Cell::new(0),
        };
        c.delay(300);
        assert!(c.t.get() - 100 >= 300);
    }

    #[test]
    fn delay_survives_wrap() {
        let c = Counter {
            t: Cell::new(u32::MAX - 20),
            reads: Cell::new(0),
        };
        c.delay(70);
        // One read for the start, then ten 7-cycle steps.
        assert_eq!(c.reads.get(), 11);
    }

    #[test]
    fn zero_delay_reads_twice() {
        let c = Counter {
            t: Cell::new(0),
            reads: Cell::new(0),
        };
        c.delay(0);
        assert_eq!(c.reads.get(), 2);
    }
}
