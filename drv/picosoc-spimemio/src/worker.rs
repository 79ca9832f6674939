// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash command execution from RAM.
//!
//! The controller can only talk to the flash chip directly after it has been
//! switched out of memory-mapped mode, and while it is out of that mode no
//! instruction can be fetched from flash. The bit-banging routine that drives
//! the bus therefore has to run from RAM. It is assembled into the image
//! between `flashio_worker_begin` and `flashio_worker_end`, copied into a
//! dedicated RAM buffer once at startup, and called through a function
//! pointer from then on.

use ringbuf::*;

/// Capacity of the RAM buffer the worker is copied into, in words.
pub const WORKER_RAM_WORDS: usize = 64;

/// Something that can run one raw flash command.
///
/// `data[0]` is the opcode and the rest of the buffer holds address, dummy
/// and data bytes. Every byte is shifted out in single-bit mode and the byte
/// clocked in at the same time replaces it in `data`. If `wrencmd` is
/// nonzero it is sent as a separate one-byte command first, with chip select
/// released in between.
pub trait Executor {
    fn run(&mut self, data: &mut [u8], wrencmd: u8);
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn run(&mut self, data: &mut [u8], wrencmd: u8) {
        (**self).run(data, wrencmd)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InstallError {
    /// The image between the markers is empty.
    Empty,
    /// The image does not fit the RAM provided for it.
    TooLarge { words: usize, capacity: usize },
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(not(target_arch = "riscv32"), allow(dead_code))]
enum Trace {
    None,
    Installed { words: usize },
    Run { opcode: u8, len: usize, wrencmd: u8 },
}

ringbuf!(Trace, 8, Trace::None);

/// The flash worker, resident in RAM.
pub struct Worker<'a> {
    code: &'a mut [u32],
}

impl<'a> Worker<'a> {
    /// Copies `image` into the front of `ram`, leaving the rest of `ram`
    /// untouched.
    ///
    /// # Safety
    ///
    /// `image` must be the flash worker routine (or another routine with the
    /// same calling convention), because [`Executor::run`] on the returned
    /// worker will jump into the copy.
    pub unsafe fn install(
        image: &[u32],
        ram: &'a mut [u32],
    ) -> Result<Self, InstallError> {
        if image.is_empty() {
            return Err(InstallError::Empty);
        }
        if image.len() > ram.len() {
            return Err(InstallError::TooLarge {
                words: image.len(),
                capacity: ram.len(),
            });
        }

        let code = &mut ram[..image.len()];
        code.copy_from_slice(image);
        sync_icache();

        ringbuf_entry!(Trace::Installed { words: code.len() });
        Ok(Self { code })
    }

    /// Returns the installed copy.
    pub fn code(&self) -> &[u32] {
        self.code
    }
}

/// Returns the words between two link-time markers.
///
/// # Safety
///
/// `begin` and `end` must delimit a single readable, word-aligned region that
/// lives for the rest of the program, with `begin <= end`.
pub unsafe fn span(begin: *const u32, end: *const u32) -> &'static [u32] {
    let words = unsafe { end.offset_from(begin) } as usize;
    unsafe { core::slice::from_raw_parts(begin, words) }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv32")] {
        use static_cell::ClaimOnceCell;

        // a0: data pointer, a1: data length, a2: write-enable opcode (0 to
        // skip). Only pc-relative branches, so it runs wherever it is copied.
        core::arch::global_asm!(
            ".pushsection .rodata.flashio_worker, \"a\"",
            ".balign 4",
            ".global flashio_worker_begin",
            ".global flashio_worker_end",
            "flashio_worker_begin:",
            // Controller config register.
            "li   t0, 0x02000000",
            // Chip select high, IO0 is an output.
            "li   t1, 0x120",
            "sh   t1, 0(t0)",
            // Manual control: clears the MEMIO enable bit.
            "sb   zero, 3(t0)",
            "beqz a2, 3f",
            "li   t5, 8",
            "andi t2, a2, 0xff",
            "2:",
            "srli t4, t2, 7",
            "sb   t4, 0(t0)",
            "ori  t4, t4, 0x10",
            "sb   t4, 0(t0)",
            "slli t2, t2, 1",
            "andi t2, t2, 0xff",
            "addi t5, t5, -1",
            "bnez t5, 2b",
            // Release chip select between the two commands.
            "sb   t1, 0(t0)",
            "3:",
            "beqz a1, 5f",
            "li   t5, 8",
            "lbu  t2, 0(a0)",
            "4:",
            "srli t4, t2, 7",
            "sb   t4, 0(t0)",
            "ori  t4, t4, 0x10",
            "sb   t4, 0(t0)",
            // Sample IO1.
            "lbu  t4, 0(t0)",
            "andi t4, t4, 2",
            "srli t4, t4, 1",
            "slli t2, t2, 1",
            "or   t2, t2, t4",
            "andi t2, t2, 0xff",
            "addi t5, t5, -1",
            "bnez t5, 4b",
            "sb   t2, 0(a0)",
            "addi a0, a0, 1",
            "addi a1, a1, -1",
            "j    3b",
            "5:",
            // Back to memory-mapped mode.
            "li   t1, 0x80",
            "sb   t1, 3(t0)",
            "ret",
            ".balign 4",
            "flashio_worker_end:",
            ".popsection",
        );

        extern "C" {
            static flashio_worker_begin: u32;
            static flashio_worker_end: u32;
        }

        static WORKER_RAM: ClaimOnceCell<[u32; WORKER_RAM_WORDS]> =
            ClaimOnceCell::new([0; WORKER_RAM_WORDS]);

        /// The worker routine as linked into the image.
        pub fn image() -> &'static [u32] {
            // Safety: both markers are defined by the assembly above, in
            // order, in the same read-only section.
            unsafe {
                span(
                    core::ptr::addr_of!(flashio_worker_begin),
                    core::ptr::addr_of!(flashio_worker_end),
                )
            }
        }

        /// Copies the worker into its RAM buffer.
        ///
        /// Panics if called more than once.
        pub fn claim() -> Result<Worker<'static>, InstallError> {
            // Safety: `image()` is the worker routine.
            unsafe { Worker::install(image(), WORKER_RAM.claim()) }
        }

        fn sync_icache() {
            // fence.i, spelled as a word because Zifencei is not part of the
            // base target features.
            unsafe { core::arch::asm!(".word 0x0000100f") };
        }

        impl Executor for Worker<'_> {
            fn run(&mut self, data: &mut [u8], wrencmd: u8) {
                ringbuf_entry!(Trace::Run {
                    opcode: data.first().copied().unwrap_or(0),
                    len: data.len(),
                    wrencmd,
                });
                // Safety: `code` holds the worker routine (see `install`),
                // and the buffer pointer and length describe `data`.
                unsafe {
                    let f: extern "C" fn(*mut u8, u32, u32) =
                        core::mem::transmute(self.code.as_ptr());
                    f(data.as_mut_ptr(), data.len() as u32, u32::from(wrencmd));
                }
            }
        }
    } else {
        fn sync_icache() {
            core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}
