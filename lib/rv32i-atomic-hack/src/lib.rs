// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provides fake atomic read-modify-write operations for situations where you
//! _really_ know what you're doing.
//!
//! The PicoSoC core is RV32I(M) without the `A` extension: atomic loads and
//! stores exist, but there is no `amoswap` and no `lr`/`sc`, so the
//! `swap` methods of `core::sync::atomic` are not available. This
//! crate substitutes a load followed by a store. That is only sound because
//!
//! 1. the SoC has a single hart, and
//! 2. the firmware runs with interrupts disabled.
//!
//! If either of those is wrong in your case, do not use these, it will go
//! badly for you.
//!
//! On targets that do have compare-and-swap (including the host that runs the
//! unit tests) the traits forward to the real atomic operations.

#![cfg_attr(target_os = "none", no_std)]

use core::sync::atomic::{AtomicBool, Ordering};

pub trait AtomicBoolExt {
    fn swap(&self, val: bool, order: Ordering) -> bool;
}

cfg_if::cfg_if! {
    if #[cfg(not(target_has_atomic = "8"))] {
        impl AtomicBoolExt for AtomicBool {
            #[inline]
            fn swap(&self, new: bool, order: Ordering) -> bool {
                let (lo, so) = rmw_ordering(order);
                let orig = self.load(lo);
                self.store(new, so);
                orig
            }
        }

        fn rmw_ordering(o: Ordering) -> (Ordering, Ordering) {
            match o {
                Ordering::AcqRel => (Ordering::Acquire, Ordering::Release),
                Ordering::Acquire => (Ordering::Acquire, Ordering::Relaxed),
                Ordering::Release => (Ordering::Relaxed, Ordering::Release),
                _ => (o, o),
            }
        }
    } else {
        impl AtomicBoolExt for AtomicBool {
            #[inline]
            fn swap(&self, new: bool, order: Ordering) -> bool {
                AtomicBool::swap(self, new, order)
            }
        }
    }
}
