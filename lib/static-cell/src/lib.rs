// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![cfg_attr(target_os = "none", no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};
use rv32i_atomic_hack::AtomicBoolExt;

/// A RefCell-style container that can be used in a static for cases where only
/// a single borrow needs to happen at any given time.
///
/// Only `mut` access is provided; there is no many-reader mode.
#[derive(Default)]
pub struct StaticCell<T> {
    borrowed: AtomicBool,
    cell: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    /// Creates a `StaticCell` containing `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            cell: UnsafeCell::new(contents),
        }
    }

    /// Gets mutable access to the contents of `self`.
    ///
    /// If a `StaticRef` for `self` still exists anywhere in the program, this
    /// will panic.
    #[track_caller]
    pub fn borrow_mut(&self) -> StaticRef<'_, T> {
        match self.try_borrow_mut() {
            Some(r) => r,
            None => panic!(),
        }
    }

    /// Gets mutable access to the contents of `self`, or `None` if a
    /// `StaticRef` for `self` is still alive.
    pub fn try_borrow_mut(&self) -> Option<StaticRef<'_, T>> {
        if AtomicBoolExt::swap(&self.borrowed, true, Ordering::Acquire) {
            return None;
        }
        // Safety: the flag above ensures that we are not producing an
        // aliasing &mut to our contents.
        Some(StaticRef {
            contents: unsafe { &mut *self.cell.get() },
            borrow: &self.borrowed,
        })
    }
}

unsafe impl<T> Sync for StaticCell<T> where for<'a> &'a mut T: Send {}

pub struct StaticRef<'a, T> {
    contents: &'a mut T,
    borrow: &'a AtomicBool,
}

impl<T> Drop for StaticRef<'_, T> {
    fn drop(&mut self) {
        self.borrow.store(false, Ordering::Release);
    }
}

impl<T> core::ops::Deref for StaticRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.contents
    }
}

impl<T> core::ops::DerefMut for StaticRef<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.contents
    }
}

/// A simpler variant of [`StaticCell`], which may be claimed only a single
/// time.
///
/// Because the value may only be claimed once, [`ClaimOnceCell::claim`] hands
/// out a `&'static mut T` rather than a guard. This is how the flash worker
/// gets its RAM: the buffer is claimed once at startup and owned by the
/// executor for the rest of the program.
pub struct ClaimOnceCell<T> {
    taken: AtomicBool,
    cell: UnsafeCell<T>,
}

// Safety: a `ClaimOnceCell` creates a single mutable reference to the inner
// value exactly once, so the value cannot be mutably aliased.
unsafe impl<T> Sync for ClaimOnceCell<T> where for<'a> &'a T: Send {}

impl<T> ClaimOnceCell<T> {
    /// Returns a new, unclaimed `ClaimOnceCell` containing `value`.
    pub const fn new(value: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            cell: UnsafeCell::new(value),
        }
    }

    /// Claims the value inside this cell, returning a `&mut T` referencing
    /// the value.
    ///
    /// If this method has already been called, subsequent calls will panic.
    #[track_caller]
    #[must_use = "claiming a `ClaimOnceCell` and not accessing it will render \
         it permanently unusable, as it will have already been claimed!"]
    pub fn claim(&self) -> &mut T {
        if AtomicBoolExt::swap(&self.taken, true, Ordering::Relaxed) {
            panic!();
        }

        // Safety: `taken` guarantees this is the only reference ever made.
        unsafe { &mut *self.cell.get() }
    }
}
